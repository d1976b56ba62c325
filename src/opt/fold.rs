//! Constant folding and propagation.
//!
//! Binary operations over two constants become copies of the folded value.
//! Constants reach their uses through copies and phis whose incoming values
//! all agree, and a conditional branch on a constant becomes a plain branch.
//! Runs to a fixpoint.

use hashbrown::HashMap;

use crate::ir::{Function, Inst, Terminator, Value, ValueKey};

use super::Pass;

#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantFold;

impl Pass for ConstantFold {
    fn name(&self) -> &'static str {
        "fold"
    }

    fn run(&self, func: &mut Function) -> bool {
        let mut changed = false;
        loop {
            let folded = fold_binops(func);
            let propagated = propagate(func);
            let branches = fold_branches(func);
            if folded + propagated + branches == 0 {
                break;
            }
            log::trace!(
                "{}: folded {}, propagated {}, resolved {} branches",
                func.name,
                folded,
                propagated,
                branches
            );
            changed = true;
        }
        changed
    }

    fn changes_cfg(&self) -> bool {
        true
    }
}

fn fold_binops(func: &mut Function) -> usize {
    let mut folded = 0;
    for block in &mut func.blocks {
        for inst in &mut block.insts {
            let Inst::BinOp { dest, op, lhs, rhs } = inst else {
                continue;
            };
            let (Some(l), Some(r)) = (lhs.as_const(), rhs.as_const()) else {
                continue;
            };
            let val = op.evaluate(l, r);
            let dest = dest.clone();
            let ty = dest.ty().clone();
            *inst = Inst::Copy {
                dest,
                src: Value::Const { val, ty },
            };
            folded += 1;
        }
    }
    folded
}

/// Temporaries defined exactly once whose value is a known constant.
fn known_constants(func: &Function) -> HashMap<ValueKey, Value> {
    let mut def_counts: HashMap<ValueKey, usize> = HashMap::new();
    for block in &func.blocks {
        let phi_defs = block.phis.iter().map(|p| &p.dest);
        for value in phi_defs.chain(block.insts.iter().filter_map(|i| i.def())) {
            if let Some(key) = value.key() {
                *def_counts.entry(key).or_insert(0) += 1;
            }
        }
    }
    let single = |key: &ValueKey| def_counts.get(key) == Some(&1);

    let mut constants = HashMap::new();
    for block in &func.blocks {
        for inst in &block.insts {
            if let Inst::Copy { dest, src } = inst {
                if let (Some(key), Value::Const { val, .. }) = (dest.key(), src) {
                    if single(&key) {
                        constants.insert(
                            key,
                            Value::Const {
                                val: *val,
                                ty: dest.ty().clone(),
                            },
                        );
                    }
                }
            }
        }
        for phi in &block.phis {
            let Some(key) = phi.dest.key() else {
                continue;
            };
            let Some((_, first)) = phi.incoming.first() else {
                continue;
            };
            if first.is_const() && phi.incoming.iter().all(|(_, v)| v == first) && single(&key) {
                constants.insert(key, first.clone());
            }
        }
    }
    constants
}

fn propagate(func: &mut Function) -> usize {
    let constants = known_constants(func);
    if constants.is_empty() {
        return 0;
    }
    let mut replaced = 0;
    let mut rewrite = |value: &mut Value| {
        if let Some(c) = value.key().and_then(|k| constants.get(&k)) {
            *value = c.clone();
            replaced += 1;
        }
    };

    for block in &mut func.blocks {
        for phi in &mut block.phis {
            for (_, value) in &mut phi.incoming {
                rewrite(value);
            }
        }
        for inst in &mut block.insts {
            for value in inst.uses_mut() {
                rewrite(value);
            }
        }
        for value in block.term.uses_mut() {
            rewrite(value);
        }
    }

    // Phis that collapsed to a constant are gone once their uses are.
    for block in &mut func.blocks {
        block
            .phis
            .retain(|phi| !phi.dest.key().is_some_and(|k| constants.contains_key(&k)));
    }
    replaced
}

/// Turn conditional branches on constants into plain branches, dropping the
/// phi incomings of the edge that disappears.
fn fold_branches(func: &mut Function) -> usize {
    let mut dropped_edges = Vec::new();
    for block in &mut func.blocks {
        let Terminator::CondBranch {
            cond,
            if_true,
            if_false,
        } = &block.term
        else {
            continue;
        };
        let Some(val) = cond.as_const() else {
            continue;
        };
        let (taken, dropped) = if val != 0 {
            (if_true.clone(), if_false.clone())
        } else {
            (if_false.clone(), if_true.clone())
        };
        if taken != dropped {
            dropped_edges.push((block.label.clone(), dropped));
        }
        block.term = Terminator::Branch(taken);
    }

    let count = dropped_edges.len();
    for (from, to) in dropped_edges {
        if let Some(target) = func.block_mut(&to) {
            for phi in &mut target.phis {
                phi.remove_incoming(&from);
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::ssa_function;
    use crate::ir::{BinaryOp, Block, Phi, Type};
    use crate::opt::DeadCode;

    #[test]
    fn test_fold_semantics() {
        let mut func = Function::new("f", vec![], Type::Int);
        let t0 = func.new_temp(Type::Int);
        let t1 = func.new_temp(Type::Int);
        let t2 = func.new_temp(Type::Bool);
        let mut entry = Block::new("entry", Terminator::Return(Some(t1.clone())));
        entry.insts.push(Inst::BinOp {
            dest: t0.clone(),
            op: BinaryOp::Div,
            lhs: Value::int(7),
            rhs: Value::int(0),
        });
        entry.insts.push(Inst::BinOp {
            dest: t1.clone(),
            op: BinaryOp::Add,
            lhs: t0.clone(),
            rhs: Value::int(i64::MAX),
        });
        entry.insts.push(Inst::BinOp {
            dest: t2.clone(),
            op: BinaryOp::Le,
            lhs: Value::int(3),
            rhs: Value::int(3),
        });
        func.blocks.push(entry);

        assert!(ConstantFold.run(&mut func));
        let insts = &func.blocks[0].insts;
        assert_eq!(insts[0], Inst::Copy { dest: t0, src: Value::int(0) });
        assert_eq!(insts[1], Inst::Copy { dest: t1, src: Value::int(i64::MAX) });
        assert_eq!(insts[2], Inst::Copy { dest: t2, src: Value::bool(true) });
        assert_eq!(func.blocks[0].term, Terminator::Return(Some(Value::int(i64::MAX))));
        assert!(!ConstantFold.run(&mut func));
    }

    #[test]
    fn test_wrapping_multiply() {
        let mut func = Function::new("f", vec![], Type::Int);
        let t0 = func.new_temp(Type::Int);
        let mut entry = Block::new("entry", Terminator::Return(Some(t0.clone())));
        entry.insts.push(Inst::BinOp {
            dest: t0,
            op: BinaryOp::Mul,
            lhs: Value::int(i64::MAX),
            rhs: Value::int(2),
        });
        func.blocks.push(entry);
        ConstantFold.run(&mut func);
        assert_eq!(func.blocks[0].term, Terminator::Return(Some(Value::int(-2))));
    }

    #[test]
    fn test_constant_branch_drops_edge_incoming() {
        let mut func = ssa_function(
            "def f() -> int:\n    if 2 > 1:\n        y = 10\n    else:\n        y = 20\n    return y\n",
            "f",
        );
        assert!(ConstantFold.run(&mut func));
        assert_eq!(func.blocks[0].term, Terminator::Branch("if_then_0".to_string()));

        // Once the dead arm is gone the phi has a single constant incoming,
        // collapses and is propagated into the return.
        DeadCode.run(&mut func);
        assert!(func.block("if_else_0").is_none());
        ConstantFold.run(&mut func);
        let merge = func.block("if_merge_0").expect("merge");
        assert!(merge.phis.is_empty());
        assert_eq!(merge.term, Terminator::Return(Some(Value::int(10))));
    }

    #[test]
    fn test_phi_with_distinct_constants_stays() {
        let mut func = Function::new("f", vec![], Type::Int);
        let c = func.new_temp(Type::Bool);
        let p = func.new_temp(Type::Int);
        func.blocks.push(Block::new(
            "entry",
            Terminator::CondBranch {
                cond: c,
                if_true: "a".to_string(),
                if_false: "b".to_string(),
            },
        ));
        func.blocks.push(Block::new("a", Terminator::Branch("join".to_string())));
        func.blocks.push(Block::new("b", Terminator::Branch("join".to_string())));
        let mut join = Block::new("join", Terminator::Return(Some(p.clone())));
        let mut phi = Phi::new(p);
        phi.incoming.push(("a".to_string(), Value::int(1)));
        phi.incoming.push(("b".to_string(), Value::int(2)));
        join.phis.push(phi);
        func.blocks.push(join);

        assert!(!ConstantFold.run(&mut func));
        assert_eq!(func.blocks[3].phis.len(), 1);
    }
}
