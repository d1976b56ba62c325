// Natural loops are found from back edges: an edge latch -> header where the
// header dominates the latch. The loop body is the header plus every block
// that reaches the latch without passing through the header.
//
// Two transforms run over those loops. Loops whose non-header blocks only do
// Add/Sub/Mul arithmetic, copies, loads and stores are marked vectorizable.
// Counting loops are unrolled four times: the header compares an induction
// phi against a constant bound with `<` or `<=`, the phi starts from a
// constant and steps by one, the trip count is a positive multiple of four no
// larger than 32, and the body is a straight chain of blocks ending in the
// latch. The chain is merged into its first block, three renamed copies of the
// body are appended with each copy reading the values the previous one
// carried around the back edge, and the header phis take the last carried
// values. The bound test in the header still runs once every four iterations.

//! Loop discovery, vectorization marks and counting-loop unrolling.

use std::collections::BTreeSet;

use hashbrown::HashMap;

use crate::ir::{BinaryOp, Function, Inst, Terminator, Value, ValueKey};
use crate::ssa::DomTree;

use super::Pass;

/// Copies of the body after unrolling, the original included.
pub const UNROLL_FACTOR: usize = 4;

/// Largest trip count that is still unrolled.
pub const MAX_UNROLL_TRIP_COUNT: i64 = 32;

/// A natural loop, by block index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalLoop {
    pub header: usize,
    pub latch: usize,
    pub blocks: BTreeSet<usize>,
}

/// Every natural loop, one per back edge.
pub fn find_loops(dom: &DomTree) -> Vec<NaturalLoop> {
    let mut loops = Vec::new();
    for &latch in dom.rpo() {
        for &header in dom.successors(latch) {
            if !dom.dominates(header, latch) {
                continue;
            }
            let mut blocks = BTreeSet::from([header]);
            let mut stack = vec![latch];
            while let Some(b) = stack.pop() {
                if blocks.insert(b) {
                    stack.extend(dom.predecessors(b).iter().copied());
                }
            }
            loops.push(NaturalLoop {
                header,
                latch,
                blocks,
            });
        }
    }
    loops
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoopTransform;

impl Pass for LoopTransform {
    fn name(&self) -> &'static str {
        "loops"
    }

    fn run(&self, func: &mut Function) -> bool {
        let dom = DomTree::compute(func);
        for lp in find_loops(&dom) {
            if is_vectorizable(func, &lp) {
                let header = func.blocks[lp.header].label.clone();
                if !func.hints.vectorizable_loops.contains(&header) {
                    log::debug!("{}: loop {} is vectorizable", func.name, header);
                    func.hints.vectorizable_loops.push(header);
                }
            }
        }

        let mut unrolled = 0;
        loop {
            let dom = DomTree::compute(func);
            let candidate = find_loops(&dom).into_iter().find_map(|lp| {
                let header = &func.blocks[lp.header].label;
                if func.hints.unrolled_loops.contains(header) {
                    return None;
                }
                counting_loop(func, &dom, &lp).map(|chain| (lp.header, chain))
            });
            let Some((header, chain)) = candidate else {
                break;
            };
            let label = func.blocks[header].label.clone();
            if !unroll(func, header, &chain) {
                break;
            }
            log::debug!("{}: unrolled loop {} x{}", func.name, label, UNROLL_FACTOR);
            func.hints.unrolled_loops.push(label);
            unrolled += 1;
        }
        unrolled > 0
    }

    fn changes_cfg(&self) -> bool {
        true
    }
}

fn is_vectorizable(func: &Function, lp: &NaturalLoop) -> bool {
    let mut body = lp
        .blocks
        .iter()
        .filter(|&&b| b != lp.header)
        .flat_map(|&b| func.blocks[b].insts.iter())
        .peekable();
    if body.peek().is_none() {
        return false;
    }
    body.all(|inst| match inst {
        Inst::BinOp { op, .. } => matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul),
        Inst::Copy { .. } | Inst::Load { .. } | Inst::Store { .. } => true,
        _ => false,
    })
}

/// Follow copies back to the value they were copied from.
fn resolve<'f>(defs: &HashMap<ValueKey, &'f Inst>, mut value: &'f Value) -> &'f Value {
    for _ in 0..defs.len() {
        match value.key().and_then(|k| defs.get(&k).copied()) {
            Some(Inst::Copy { src, .. }) => value = src,
            _ => break,
        }
    }
    value
}

/// The body chain of a counting loop whose trip count allows unrolling.
fn counting_loop(func: &Function, dom: &DomTree, lp: &NaturalLoop) -> Option<Vec<usize>> {
    let header = &func.blocks[lp.header];
    let preds = dom.predecessors(lp.header);
    if preds.len() != 2 {
        return None;
    }
    let Terminator::CondBranch {
        cond,
        if_true,
        if_false,
    } = &header.term
    else {
        return None;
    };
    let body_start = func.block_index(if_true)?;
    let exit = func.block_index(if_false)?;
    if !lp.blocks.contains(&body_start) || lp.blocks.contains(&exit) {
        return None;
    }

    let [Inst::BinOp {
        dest,
        op,
        lhs: iv,
        rhs: Value::Const { val: bound, .. },
    }] = header.insts.as_slice()
    else {
        return None;
    };
    if dest != cond || !matches!(op, BinaryOp::Lt | BinaryOp::Le) {
        return None;
    }
    let phi = header.phis.iter().find(|p| &p.dest == iv)?;

    let defs: HashMap<ValueKey, &Inst> = func
        .blocks
        .iter()
        .flat_map(|b| b.insts.iter())
        .filter_map(|inst| inst.def().and_then(|d| d.key()).map(|k| (k, inst)))
        .collect();

    let latch_label = &func.blocks[lp.latch].label;
    let preheader = preds.iter().copied().find(|&p| p != lp.latch)?;
    let start = resolve(&defs, phi.incoming_from(&func.blocks[preheader].label)?).as_const()?;
    let step = resolve(&defs, phi.incoming_from(latch_label)?);
    let steps_by_one = match step.key().and_then(|k| defs.get(&k).copied()) {
        Some(Inst::BinOp {
            op: BinaryOp::Add,
            lhs,
            rhs,
            ..
        }) => (lhs == iv && rhs.is_const_value(1)) || (rhs == iv && lhs.is_const_value(1)),
        _ => false,
    };
    if !steps_by_one {
        return None;
    }

    let mut trip_count = bound.checked_sub(start)?;
    if *op == BinaryOp::Le {
        trip_count = trip_count.checked_add(1)?;
    }
    if trip_count <= 0 || trip_count > MAX_UNROLL_TRIP_COUNT || trip_count % UNROLL_FACTOR as i64 != 0 {
        return None;
    }

    let mut chain = Vec::new();
    let mut current = body_start;
    loop {
        let block = &func.blocks[current];
        if !block.phis.is_empty() || dom.predecessors(current).len() != 1 || chain.len() >= lp.blocks.len() {
            return None;
        }
        chain.push(current);
        let Terminator::Branch(next) = &block.term else {
            return None;
        };
        let next = func.block_index(next)?;
        if next == lp.header {
            break;
        }
        if !lp.blocks.contains(&next) {
            return None;
        }
        current = next;
    }

    if chain.last() != Some(&lp.latch) || chain.len() + 1 != lp.blocks.len() {
        return None;
    }
    log::trace!(
        "{}: counting loop {} runs {} times",
        func.name,
        header.label,
        trip_count
    );
    Some(chain)
}

fn unroll(func: &mut Function, header: usize, chain: &[usize]) -> bool {
    let (Some(&first), Some(&latch)) = (chain.first(), chain.last()) else {
        return false;
    };
    let header_label = func.blocks[header].label.clone();
    let first_label = func.blocks[first].label.clone();
    let latch_label = func.blocks[latch].label.clone();

    let mut phi_keys = Vec::new();
    let mut carried = Vec::new();
    for phi in &func.blocks[header].phis {
        let (Some(key), Some(value)) = (phi.dest.key(), phi.incoming_from(&latch_label)) else {
            return false;
        };
        phi_keys.push(key);
        carried.push(value.clone());
    }

    let body: Vec<Inst> = chain
        .iter()
        .flat_map(|&b| func.blocks[b].insts.iter().cloned())
        .collect();
    let mut unrolled = body.clone();

    for _ in 1..UNROLL_FACTOR {
        let mut subst: HashMap<ValueKey, Value> = phi_keys.iter().copied().zip(carried.iter().cloned()).collect();
        for inst in &body {
            let mut copy = inst.clone();
            for value in copy.uses_mut() {
                if let Some(replacement) = value.key().and_then(|k| subst.get(&k)) {
                    *value = replacement.clone();
                }
            }
            if let Some(dest) = copy.def_mut() {
                let fresh = func.new_temp(dest.ty().clone());
                if let Some(key) = dest.key() {
                    subst.insert(key, fresh.clone());
                }
                *dest = fresh;
            }
            unrolled.push(copy);
        }
        carried = carried
            .iter()
            .map(|v| v.key().and_then(|k| subst.get(&k)).cloned().unwrap_or_else(|| v.clone()))
            .collect();
    }

    let block = &mut func.blocks[first];
    block.insts = unrolled;
    block.term = Terminator::Branch(header_label);

    for (phi, value) in func.blocks[header].phis.iter_mut().zip(carried) {
        phi.remove_incoming(&latch_label);
        phi.incoming.push((first_label.clone(), value));
    }

    let merged: Vec<String> = chain[1..].iter().map(|&b| func.blocks[b].label.clone()).collect();
    func.blocks.retain(|b| !merged.contains(&b.label));
    true
}
