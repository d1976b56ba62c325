//! Escape analysis for object allocations.
//!
//! An allocation escapes once any alias of it (through copies and phis) is
//! returned, stored into another object, passed to a call, stored into a
//! container or memory cell, or captured by a closure. Allocations that never
//! escape are recorded in the function hints; nothing is rewritten.

use std::collections::BTreeSet;

use hashbrown::{HashMap, HashSet};

use crate::ir::{Function, Inst, Terminator, Value, ValueKey};

use super::Pass;

#[derive(Debug, Default, Clone, Copy)]
pub struct EscapeAnalysis;

impl Pass for EscapeAnalysis {
    fn name(&self) -> &'static str {
        "escape"
    }

    fn run(&self, func: &mut Function) -> bool {
        let non_escaping = non_escaping_allocations(func);
        if !non_escaping.is_empty() {
            log::debug!(
                "{}: {} non-escaping allocations",
                func.name,
                non_escaping.len()
            );
        }
        func.hints.non_escaping = non_escaping;
        false
    }
}

/// Temp ids of `AllocObject` results that never escape.
pub fn non_escaping_allocations(func: &Function) -> BTreeSet<u32> {
    // Alias -> allocations it may hold.
    let mut points_to: HashMap<ValueKey, HashSet<u32>> = HashMap::new();
    for block in &func.blocks {
        for inst in &block.insts {
            if let Inst::AllocObject { dest, .. } = inst {
                if let (Some(key), Value::Temp { id, .. }) = (dest.key(), dest) {
                    points_to.entry(key).or_default().insert(*id);
                }
            }
        }
    }
    if points_to.is_empty() {
        return BTreeSet::new();
    }

    // Propagate through copies and phis until stable.
    let mut changed = true;
    while changed {
        changed = false;
        for block in &func.blocks {
            let copies = block.insts.iter().filter_map(|inst| match inst {
                Inst::Copy { dest, src } => Some((dest, src)),
                _ => None,
            });
            let phi_edges = block
                .phis
                .iter()
                .flat_map(|phi| phi.incoming.iter().map(move |(_, v)| (&phi.dest, v)));
            for (dest, src) in copies.chain(phi_edges) {
                let (Some(d), Some(s)) = (dest.key(), src.key()) else {
                    continue;
                };
                let Some(sources) = points_to.get(&s).cloned() else {
                    continue;
                };
                let target = points_to.entry(d).or_default();
                for id in sources {
                    changed |= target.insert(id);
                }
            }
        }
    }

    let mut escaped: HashSet<u32> = HashSet::new();
    let mut escape = |value: &Value| {
        if let Some(ids) = value.key().and_then(|k| points_to.get(&k)) {
            escaped.extend(ids.iter().copied());
        }
    };

    for block in &func.blocks {
        for inst in &block.insts {
            match inst {
                Inst::SetAttr { value, .. } => escape(value),
                Inst::SetItem { value, .. } => escape(value),
                Inst::Store { src, .. } => escape(src),
                Inst::Call { args, .. } => args.iter().for_each(&mut escape),
                Inst::MethodCall { receiver, args, .. } => {
                    escape(receiver);
                    args.iter().for_each(&mut escape);
                }
                Inst::ClosureCall { args, .. } => args.iter().for_each(&mut escape),
                Inst::MakeClosure { captures, .. } => captures.iter().for_each(&mut escape),
                _ => {}
            }
        }
        if let Terminator::Return(Some(value)) = &block.term {
            escape(value);
        }
    }

    points_to
        .values()
        .flatten()
        .copied()
        .filter(|id| !escaped.contains(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::lower_ssa;

    const POINT: &str = "class Point:\n    x: int\n    y: int\n\n";

    fn analyze(body: &str, name: &str) -> (Function, BTreeSet<u32>) {
        let source = format!("{}{}", POINT, body);
        let mut program = lower_ssa(&source);
        let index = program
            .functions
            .iter()
            .position(|f| f.name == name)
            .expect("function");
        let mut func = program.functions.swap_remove(index);
        EscapeAnalysis.run(&mut func);
        let marked = func.hints.non_escaping.clone();
        (func, marked)
    }

    #[test]
    fn test_local_object_does_not_escape() {
        let (_, marked) = analyze(
            "def f() -> int:\n    p = Point()\n    p.x = 3\n    return p.x\n",
            "f",
        );
        assert_eq!(marked.len(), 1);
    }

    #[test]
    fn test_returned_object_escapes() {
        let (_, marked) = analyze("def f() -> Point:\n    p = Point()\n    q = p\n    return q\n", "f");
        assert!(marked.is_empty());
    }

    #[test]
    fn test_object_passed_to_call_escapes() {
        let (_, marked) = analyze(
            "def g(p: Point) -> int:\n    return 0\n\ndef f() -> int:\n    p = Point()\n    return g(p)\n",
            "f",
        );
        assert!(marked.is_empty());
    }

    #[test]
    fn test_object_stored_in_other_object_escapes() {
        let (_, marked) = analyze(
            "def f(o: Point) -> int:\n    p = Point()\n    o.x = p\n    return 0\n",
            "f",
        );
        assert!(marked.is_empty());
    }
}
