//! Table-driven algebraic identities and adjacent-pair rewrites.

use crate::ir::{BinaryOp, Function, Inst, Value};

use super::Pass;

/// Which operand position the constant of a rule may occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
    Either,
}

/// What an identity rewrites the instruction to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    /// Copy of the other operand.
    Operand,
    /// Copy of constant zero.
    Zero,
    /// The other operand added to itself.
    Double,
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub op: BinaryOp,
    pub side: Side,
    pub constant: i64,
    pub rewrite: Rewrite,
}

const fn rule(op: BinaryOp, side: Side, constant: i64, rewrite: Rewrite) -> Rule {
    Rule {
        op,
        side,
        constant,
        rewrite,
    }
}

/// Single-instruction identities. `x - 0` and `x / 1` only hold with the
/// constant on the right.
pub const RULES: &[Rule] = &[
    rule(BinaryOp::Add, Side::Either, 0, Rewrite::Operand),
    rule(BinaryOp::Sub, Side::Right, 0, Rewrite::Operand),
    rule(BinaryOp::Mul, Side::Either, 0, Rewrite::Zero),
    rule(BinaryOp::Mul, Side::Either, 1, Rewrite::Operand),
    rule(BinaryOp::Mul, Side::Either, 2, Rewrite::Double),
    rule(BinaryOp::Div, Side::Right, 1, Rewrite::Operand),
    rule(BinaryOp::And, Side::Either, 0, Rewrite::Zero),
    rule(BinaryOp::Or, Side::Either, 0, Rewrite::Operand),
    rule(BinaryOp::Xor, Side::Either, 0, Rewrite::Operand),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct Peephole;

impl Pass for Peephole {
    fn name(&self) -> &'static str {
        "peephole"
    }

    fn run(&self, func: &mut Function) -> bool {
        let mut changed = false;
        loop {
            let identities = apply_identities(func);
            let pairs = apply_pairs(func);
            if identities + pairs == 0 {
                break;
            }
            log::trace!(
                "{}: peephole rewrote {} identities, {} pairs",
                func.name,
                identities,
                pairs
            );
            changed = true;
        }
        changed
    }
}

/// Rewrite for one instruction, if any rule matches.
pub fn simplify(inst: &Inst) -> Option<Inst> {
    let Inst::BinOp { dest, op, lhs, rhs } = inst else {
        return None;
    };
    for rule in RULES.iter().filter(|r| r.op == *op) {
        let other = if matches!(rule.side, Side::Right | Side::Either)
            && rhs.is_const_value(rule.constant)
        {
            lhs
        } else if matches!(rule.side, Side::Left | Side::Either)
            && lhs.is_const_value(rule.constant)
        {
            rhs
        } else {
            continue;
        };
        return Some(match rule.rewrite {
            Rewrite::Operand => Inst::Copy {
                dest: dest.clone(),
                src: other.clone(),
            },
            Rewrite::Zero => Inst::Copy {
                dest: dest.clone(),
                src: Value::Const {
                    val: 0,
                    ty: dest.ty().clone(),
                },
            },
            Rewrite::Double => Inst::BinOp {
                dest: dest.clone(),
                op: BinaryOp::Add,
                lhs: other.clone(),
                rhs: other.clone(),
            },
        });
    }
    None
}

fn apply_identities(func: &mut Function) -> usize {
    let mut rewritten = 0;
    for block in &mut func.blocks {
        for inst in &mut block.insts {
            if let Some(replacement) = simplify(inst) {
                *inst = replacement;
                rewritten += 1;
            }
        }
    }
    rewritten
}

/// Rewrites over adjacent instruction pairs:
/// - a second load of the same address becomes a copy of the first;
/// - a binop whose only use is the following copy computes straight into the
///   copy's destination;
/// - a load right after a store to the same address is forwarded.
fn apply_pairs(func: &mut Function) -> usize {
    let uses = func.use_counts();
    let mut rewritten = 0;

    for block in &mut func.blocks {
        let mut i = 0;
        while i + 1 < block.insts.len() {
            let (head, tail) = block.insts.split_at_mut(i + 1);
            let first = &mut head[i];
            let second = &mut tail[0];

            match (&*first, &*second) {
                (Inst::Load { dest: d1, addr: a1 }, Inst::Load { dest: d2, addr: a2 })
                    if a1 == a2 && a1.key() != d1.key() =>
                {
                    *second = Inst::Copy {
                        dest: d2.clone(),
                        src: d1.clone(),
                    };
                    rewritten += 1;
                }
                (Inst::Store { addr: a1, src }, Inst::Load { dest, addr: a2 }) if a1 == a2 => {
                    *second = Inst::Copy {
                        dest: dest.clone(),
                        src: src.clone(),
                    };
                    rewritten += 1;
                }
                (Inst::BinOp { dest: tmp, .. }, Inst::Copy { dest, src })
                    if src == tmp
                        && tmp.key().is_some_and(|k| uses.get(&k) == Some(&1))
                        && dest.key() != tmp.key() =>
                {
                    let dest = dest.clone();
                    if let Inst::BinOp { dest: target, .. } = first {
                        *target = dest;
                    }
                    block.insts.remove(i + 1);
                    rewritten += 1;
                    continue;
                }
                _ => {}
            }
            i += 1;
        }
    }
    rewritten
}
