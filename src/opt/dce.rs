//! Dead code elimination.
//!
//! Blocks the entry cannot reach are dropped whole. Pure instructions whose
//! result nobody reads and phis that no real use needs are then removed until
//! nothing changes.

use crate::ir::Function;
use crate::ssa::{prune_dead_phis, remove_unreachable_blocks};

use super::Pass;

#[derive(Debug, Default, Clone, Copy)]
pub struct DeadCode;

impl Pass for DeadCode {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&self, func: &mut Function) -> bool {
        let blocks = remove_unreachable_blocks(func);
        let mut insts = 0;
        let mut phis = 0;
        loop {
            let removed_insts = remove_unused_pure(func);
            let removed_phis = prune_dead_phis(func);
            if removed_insts + removed_phis == 0 {
                break;
            }
            insts += removed_insts;
            phis += removed_phis;
        }

        if blocks + insts + phis > 0 {
            log::trace!(
                "{}: dce removed {} blocks, {} instructions, {} phis",
                func.name,
                blocks,
                insts,
                phis
            );
        }
        blocks + insts + phis > 0
    }

    fn changes_cfg(&self) -> bool {
        true
    }
}

fn remove_unused_pure(func: &mut Function) -> usize {
    let uses = func.use_counts();
    let mut removed = 0;
    for block in &mut func.blocks {
        let before = block.insts.len();
        block.insts.retain(|inst| {
            if !inst.is_pure() {
                return true;
            }
            inst.def()
                .and_then(|d| d.key())
                .is_some_and(|k| uses.get(&k).copied().unwrap_or(0) > 0)
        });
        removed += before - block.insts.len();
    }
    removed
}
