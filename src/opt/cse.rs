// Common subexpression elimination by dominator-scoped value numbering. Every
// binary operation gets a canonical key made of its operator and the
// identities of its operands; operands of commutative operators are ordered so
// `a + b` and `b + a` share a key. Walking the dominator tree, the first
// computation of a key stays available to every block it dominates, and a later
// computation with the same key becomes a copy of the earlier result. Leaving
// a subtree drops the keys it introduced.

//! Dominator-scoped common subexpression elimination.

use hashbrown::HashMap;

use crate::ir::{BinaryOp, Function, Inst, Value, ValueKey};
use crate::ssa::DomTree;

use super::Pass;

/// Operand identity inside an expression key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperandKey {
    Value(ValueKey),
    Const(i64),
}

impl OperandKey {
    fn of(value: &Value) -> Self {
        match value.key() {
            Some(key) => OperandKey::Value(key),
            None => OperandKey::Const(value.as_const().unwrap_or(0)),
        }
    }
}

/// Canonical key of a binary operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprKey {
    pub op: BinaryOp,
    pub lhs: OperandKey,
    pub rhs: OperandKey,
}

impl ExprKey {
    pub fn new(op: BinaryOp, lhs: &Value, rhs: &Value) -> Self {
        let (mut lhs, mut rhs) = (OperandKey::of(lhs), OperandKey::of(rhs));
        if op.is_commutative() && rhs < lhs {
            std::mem::swap(&mut lhs, &mut rhs);
        }
        Self { op, lhs, rhs }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CommonSubexpressions;

impl Pass for CommonSubexpressions {
    fn name(&self) -> &'static str {
        "cse"
    }

    fn run(&self, func: &mut Function) -> bool {
        let dom = DomTree::compute(func);
        let Some(&entry) = dom.rpo().first() else {
            return false;
        };

        let mut available: HashMap<ExprKey, Value> = HashMap::new();
        let mut introduced: HashMap<usize, Vec<ExprKey>> = HashMap::new();
        let mut work = vec![(entry, true)];
        let mut replaced = 0;

        while let Some((b, entering)) = work.pop() {
            if !entering {
                for key in introduced.remove(&b).unwrap_or_default() {
                    available.remove(&key);
                }
                continue;
            }

            let mut keys = Vec::new();
            for inst in &mut func.blocks[b].insts {
                let Inst::BinOp { dest, op, lhs, rhs } = inst else {
                    continue;
                };
                if dest.key().is_none() {
                    continue;
                }
                let key = ExprKey::new(*op, lhs, rhs);
                match available.get(&key) {
                    Some(earlier) => {
                        let src = earlier.clone();
                        let dest = dest.clone();
                        *inst = Inst::Copy { dest, src };
                        replaced += 1;
                    }
                    None => {
                        available.insert(key, dest.clone());
                        keys.push(key);
                    }
                }
            }
            introduced.insert(b, keys);

            work.push((b, false));
            for &child in dom.children(b).iter().rev() {
                work.push((child, true));
            }
        }

        if replaced > 0 {
            log::trace!("{}: cse replaced {} computations", func.name, replaced);
        }
        replaced > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::ssa_function;
    use crate::ir::Type;

    #[test]
    fn test_commutative_keys_match() {
        let a = Value::param(0, "a", Type::Int);
        let b = Value::param(1, "b", Type::Int);
        assert_eq!(ExprKey::new(BinaryOp::Add, &a, &b), ExprKey::new(BinaryOp::Add, &b, &a));
        assert_ne!(ExprKey::new(BinaryOp::Sub, &a, &b), ExprKey::new(BinaryOp::Sub, &b, &a));
        assert_ne!(ExprKey::new(BinaryOp::Lt, &a, &b), ExprKey::new(BinaryOp::Lt, &b, &a));
    }

    #[test]
    fn test_redundant_computation_becomes_copy() {
        let mut func = ssa_function(
            "def f(a: int, b: int) -> int:\n    x = a * b\n    y = b * a\n    return x + y\n",
            "f",
        );
        assert!(CommonSubexpressions.run(&mut func));
        let copies = func.blocks[0]
            .insts
            .iter()
            .filter(|i| matches!(i, Inst::Copy { src: Value::Temp { .. }, .. }))
            .count();
        let muls = func.blocks[0]
            .insts
            .iter()
            .filter(|i| matches!(i, Inst::BinOp { op: BinaryOp::Mul, .. }))
            .count();
        assert_eq!(muls, 1);
        assert!(copies >= 3);
    }

    #[test]
    fn test_sibling_branches_do_not_share() {
        let mut func = ssa_function(
            "def f(a: int, b: int) -> int:\n    if a > b:\n        return a + b\n    else:\n        return a + b\n",
            "f",
        );
        assert!(!CommonSubexpressions.run(&mut func));
    }

    #[test]
    fn test_dominating_computation_reused_in_branch() {
        let mut func = ssa_function(
            "def f(a: int, b: int) -> int:\n    x = a - b\n    if a > b:\n        return a - b\n    return x\n",
            "f",
        );
        assert!(CommonSubexpressions.run(&mut func));
        let then = func.block("if_then_0").expect("then");
        assert!(matches!(then.insts[0], Inst::Copy { .. }));
    }
}
