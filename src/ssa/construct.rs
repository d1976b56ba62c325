// SSA construction following Cytron et al. The builder leaves every source
// variable as a temporary that is written by several copies; those
// multiply-defined temporaries are the variables renamed here. Unreachable
// blocks are dropped first so every remaining block has a dominator. Phis are
// placed at the iterated dominance frontier of each variable's defining
// blocks, then a walk over the dominator tree keeps a stack of reaching
// definitions per variable, gives every definition a fresh temporary and
// rewrites uses, including the incoming values of successor phis. A use that
// no definition reaches reads a typed zero. Phis that no real instruction
// needs are pruned at the end.

//! Phi placement, renaming and dead-phi pruning.

use hashbrown::{HashMap, HashSet};

use crate::core::CompileResult;
use crate::ir::{Function, Phi, Type, Value, ValueKey};

use super::cfg::{build_cfg, remove_unreachable_blocks};
use super::dominators::DomTree;

/// Rewrite `func` into SSA form and rebuild its CFG.
pub fn construct_ssa(func: &mut Function) -> CompileResult<()> {
    build_cfg(func)?;
    if remove_unreachable_blocks(func) > 0 {
        build_cfg(func)?;
    }

    let dom = DomTree::compute(func);
    let variables = collect_variables(func);
    if variables.is_empty() {
        log::trace!("{}: already in SSA form", func.name);
        prune_dead_phis(func);
        return Ok(());
    }

    let placed = place_phis(func, &dom, &variables);
    rename(func, &dom, &variables);
    let pruned = prune_dead_phis(func);

    log::debug!(
        "SSA for {}: {} variables, {} phis placed, {} pruned",
        func.name,
        variables.len(),
        placed,
        pruned
    );
    Ok(())
}

/// Whether every temporary has at most one definition.
pub fn is_ssa(func: &Function) -> bool {
    let mut seen = HashSet::new();
    func.blocks.iter().all(|block| {
        let phi_defs = block.phis.iter().map(|p| &p.dest);
        let inst_defs = block.insts.iter().filter_map(|i| i.def());
        phi_defs
            .chain(inst_defs)
            .filter_map(|v| v.key())
            .all(|key| seen.insert(key))
    })
}

struct Variable {
    ty: Type,
    def_blocks: Vec<usize>,
}

/// Temporaries defined more than once, with their defining blocks.
fn collect_variables(func: &Function) -> HashMap<u32, Variable> {
    let mut defs: HashMap<u32, (usize, Variable)> = HashMap::new();
    for (b, block) in func.blocks.iter().enumerate() {
        let phi_defs = block.phis.iter().map(|p| &p.dest);
        let inst_defs = block.insts.iter().filter_map(|i| i.def());
        for value in phi_defs.chain(inst_defs) {
            let Value::Temp { id, ty } = value else {
                continue;
            };
            let entry = defs.entry(*id).or_insert_with(|| {
                (
                    0,
                    Variable {
                        ty: ty.clone(),
                        def_blocks: Vec::new(),
                    },
                )
            });
            entry.0 += 1;
            if !entry.1.def_blocks.contains(&b) {
                entry.1.def_blocks.push(b);
            }
        }
    }
    defs.into_iter()
        .filter(|(_, (count, _))| *count > 1)
        .map(|(id, (_, var))| (id, var))
        .collect()
}

/// Insert phis at the iterated dominance frontier of every variable. The new
/// phis name the variable itself in both the destination and each incoming
/// slot until renaming rewrites them.
fn place_phis(func: &mut Function, dom: &DomTree, variables: &HashMap<u32, Variable>) -> usize {
    let frontiers = dom.frontiers();
    let mut placed = 0;

    let mut ids: Vec<u32> = variables.keys().copied().collect();
    ids.sort_unstable();

    for id in ids {
        let var = &variables[&id];
        let value = Value::temp(id, var.ty.clone());
        let mut has_phi: HashSet<usize> = HashSet::new();
        let mut worklist = var.def_blocks.clone();
        let mut queued: HashSet<usize> = worklist.iter().copied().collect();

        while let Some(b) = worklist.pop() {
            for &d in &frontiers[b] {
                if !has_phi.insert(d) {
                    continue;
                }
                let mut phi = Phi::new(value.clone());
                for &p in dom.predecessors(d) {
                    phi.incoming.push((func.blocks[p].label.clone(), value.clone()));
                }
                func.blocks[d].phis.push(phi);
                placed += 1;
                if queued.insert(d) {
                    worklist.push(d);
                }
            }
        }
    }
    placed
}

struct Renamer<'a> {
    variables: &'a HashMap<u32, Variable>,
    stacks: HashMap<u32, Vec<Value>>,
    next_temp: u32,
}

impl Renamer<'_> {
    fn fresh(&mut self, ty: Type) -> Value {
        let id = self.next_temp;
        self.next_temp += 1;
        Value::temp(id, ty)
    }

    fn variable_of(&self, value: &Value) -> Option<u32> {
        match value {
            Value::Temp { id, .. } if self.variables.contains_key(id) => Some(*id),
            _ => None,
        }
    }

    /// Reaching definition of a used variable, or a typed zero when none
    /// reaches.
    fn rewrite_use(&self, value: &mut Value) {
        let Some(id) = self.variable_of(value) else {
            return;
        };
        let reaching = self.stacks.get(&id).and_then(|s| s.last()).cloned();
        *value = reaching.unwrap_or_else(|| Value::Const {
            val: 0,
            ty: value.ty().clone(),
        });
    }

    fn define(&mut self, value: &mut Value, pushed: &mut Vec<u32>) {
        let Some(id) = self.variable_of(value) else {
            return;
        };
        let fresh = self.fresh(value.ty().clone());
        self.stacks.entry(id).or_default().push(fresh.clone());
        pushed.push(id);
        *value = fresh;
    }
}

fn rename(func: &mut Function, dom: &DomTree, variables: &HashMap<u32, Variable>) {
    let mut renamer = Renamer {
        variables,
        stacks: HashMap::new(),
        next_temp: func.temp_count(),
    };

    // (block, entering); the exit marker pops the block's definitions.
    let mut work: Vec<(usize, bool)> = dom.rpo().first().map(|&e| vec![(e, true)]).unwrap_or_default();
    let mut pushed_per_block: HashMap<usize, Vec<u32>> = HashMap::new();

    while let Some((b, entering)) = work.pop() {
        if !entering {
            for id in pushed_per_block.remove(&b).unwrap_or_default() {
                if let Some(stack) = renamer.stacks.get_mut(&id) {
                    stack.pop();
                }
            }
            continue;
        }

        let mut pushed = Vec::new();
        let label = func.blocks[b].label.clone();
        {
            let block = &mut func.blocks[b];
            for phi in &mut block.phis {
                renamer.define(&mut phi.dest, &mut pushed);
            }
            for inst in &mut block.insts {
                for value in inst.uses_mut() {
                    renamer.rewrite_use(value);
                }
                if let Some(dest) = inst.def_mut() {
                    renamer.define(dest, &mut pushed);
                }
            }
            for value in block.term.uses_mut() {
                renamer.rewrite_use(value);
            }
        }

        for &s in dom.successors(b) {
            for phi in &mut func.blocks[s].phis {
                for (pred, value) in &mut phi.incoming {
                    if *pred == label {
                        renamer.rewrite_use(value);
                    }
                }
            }
        }

        pushed_per_block.insert(b, pushed);
        work.push((b, false));
        for &child in dom.children(b).iter().rev() {
            work.push((child, true));
        }
    }

    if renamer.next_temp > 0 {
        func.reserve_temp(renamer.next_temp - 1);
    }
}

/// Remove phis whose results never reach a non-phi use. Returns how many
/// were removed.
pub fn prune_dead_phis(func: &mut Function) -> usize {
    let mut live: HashSet<ValueKey> = HashSet::new();
    for block in &func.blocks {
        for inst in &block.insts {
            live.extend(inst.uses().into_iter().filter_map(|v| v.key()));
        }
        live.extend(block.term.uses().into_iter().filter_map(|v| v.key()));
    }

    let mut changed = true;
    while changed {
        changed = false;
        for block in &func.blocks {
            for phi in &block.phis {
                if !phi.dest.key().is_some_and(|k| live.contains(&k)) {
                    continue;
                }
                for (_, value) in &phi.incoming {
                    if let Some(key) = value.key() {
                        changed |= live.insert(key);
                    }
                }
            }
        }
    }

    let mut removed = 0;
    for block in &mut func.blocks {
        let before = block.phis.len();
        block
            .phis
            .retain(|phi| phi.dest.key().is_some_and(|k| live.contains(&k)));
        removed += before - block.phis.len();
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse;
    use crate::ir::{build_program, BinaryOp, Inst, Terminator};

    fn ssa_of(source: &str) -> Function {
        let _ = env_logger::builder().is_test(true).try_init();
        let module = parse(source).expect("parse");
        let (program, failures) = build_program(&module);
        assert!(failures.is_empty(), "{:?}", failures);
        let mut func = program.functions.into_iter().next().expect("function");
        construct_ssa(&mut func).expect("ssa");
        func
    }

    #[test]
    fn test_straight_line_is_untouched() {
        let func = ssa_of("def add(a: int, b: int) -> int:\n    return a + b\n");
        assert!(is_ssa(&func));
        assert!(func.blocks.iter().all(|b| b.phis.is_empty()));
    }

    #[test]
    fn test_diamond_gets_phi() {
        let func = ssa_of(
            "def f(x: int) -> int:\n    if x > 0:\n        y = 1\n    else:\n        y = 2\n    return y\n",
        );
        assert!(is_ssa(&func));
        let merge = func.block("if_merge_0").expect("merge");
        assert_eq!(merge.phis.len(), 1);
        let phi = &merge.phis[0];
        assert_eq!(phi.incoming.len(), 2);
        assert_eq!(merge.term, Terminator::Return(Some(phi.dest.clone())));

        // Each incoming is the copy defined in the matching arm.
        for (pred, value) in &phi.incoming {
            let arm = func.block(pred).expect("arm");
            assert!(matches!(&arm.insts[0], Inst::Copy { dest, .. } if dest == value));
        }
    }

    #[test]
    fn test_loop_counter_phi_in_header() {
        let func = ssa_of(
            "def f(n: int) -> int:\n    total = 0\n    for i in range(n):\n        total = total + i\n    return total\n",
        );
        assert!(is_ssa(&func));
        let header = func.block("for_header_0").expect("header");
        // One phi for `i` and one for `total`.
        assert_eq!(header.phis.len(), 2);
        for phi in &header.phis {
            let preds: Vec<&str> = phi.incoming.iter().map(|(l, _)| l.as_str()).collect();
            assert!(preds.contains(&"entry"));
            assert!(preds.contains(&"for_step_0"));
        }
        // The compare reads the phi, not the pre-SSA variable.
        let Inst::BinOp { op: BinaryOp::Lt, lhs, .. } = &header.insts[0] else {
            panic!("expected compare");
        };
        assert!(header.phis.iter().any(|p| &p.dest == lhs));
    }

    #[test]
    fn test_dead_phi_is_pruned() {
        let func = ssa_of(
            "def f(x: int) -> int:\n    if x > 0:\n        y = 1\n    else:\n        y = 2\n    return x\n",
        );
        assert!(func.blocks.iter().all(|b| b.phis.is_empty()));
    }

    #[test]
    fn test_unreached_use_reads_zero() {
        let func = ssa_of(
            "def f(x: int) -> int:\n    if x > 0:\n        y = 1\n    if x > 1:\n        y = 2\n    return y\n",
        );
        assert!(is_ssa(&func));
        let first_merge = func.block("if_merge_0").expect("merge");
        let phi = &first_merge.phis[0];
        assert_eq!(phi.incoming_from("entry"), Some(&Value::int(0)));
    }

    #[test]
    fn test_unreachable_for_step_is_removed() {
        let func = ssa_of(
            "def f(n: int) -> int:\n    for i in range(n):\n        return i\n    return 0\n",
        );
        assert!(func.block("for_step_0").is_none());
        assert!(is_ssa(&func));
    }
}
