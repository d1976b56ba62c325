//! Devirtualization of method calls on receivers of known concrete class.

use hashbrown::HashMap;

use crate::ir::{ClassTable, Function, Inst, ValueKey};

use super::Pass;

/// Rewrites `MethodCall`s whose receiver was allocated earlier in the same
/// block (directly or through copies) into direct calls of the resolved
/// method symbol.
pub struct Devirtualize<'a> {
    classes: &'a ClassTable,
}

impl<'a> Devirtualize<'a> {
    pub fn new(classes: &'a ClassTable) -> Self {
        Self { classes }
    }
}

impl Pass for Devirtualize<'_> {
    fn name(&self) -> &'static str {
        "devirt"
    }

    fn run(&self, func: &mut Function) -> bool {
        let mut rewritten = 0;
        for block in &mut func.blocks {
            let mut known: HashMap<ValueKey, String> = HashMap::new();
            for inst in &mut block.insts {
                match inst {
                    Inst::AllocObject { dest, class } => {
                        if let Some(key) = dest.key() {
                            known.insert(key, class.clone());
                        }
                    }
                    Inst::Copy { dest, src } => {
                        let class = src.key().and_then(|k| known.get(&k)).cloned();
                        if let (Some(key), Some(class)) = (dest.key(), class) {
                            known.insert(key, class);
                        }
                    }
                    Inst::MethodCall {
                        dest,
                        receiver,
                        method,
                        args,
                    } => {
                        let Some(class) = receiver.key().and_then(|k| known.get(&k)) else {
                            continue;
                        };
                        let Some(symbol) = self.classes.resolve_method(class, method) else {
                            continue;
                        };
                        log::trace!("{}: devirtualized {}.{} to {}", func.name, class, method, symbol);
                        let mut call_args = Vec::with_capacity(args.len() + 1);
                        call_args.push(receiver.clone());
                        call_args.append(args);
                        let dest = dest.clone();
                        *inst = Inst::Call {
                            dest,
                            func: symbol,
                            args: call_args,
                        };
                        rewritten += 1;
                    }
                    _ => {}
                }
            }
        }
        rewritten > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::lower_ssa;

    const SHAPES: &str = "class Shape:\n    id: int\n    def area(self) -> int:\n        return 0\n\nclass Square(Shape):\n    side: int\n    def __init__(self, side: int):\n        self.side = side\n\n";

    #[test]
    fn test_known_receiver_becomes_direct_call() {
        let source = format!(
            "{}def f() -> int:\n    s = Square(3)\n    t = s\n    return t.area()\n",
            SHAPES
        );
        let program = lower_ssa(&source);
        let mut func = program.function("f").expect("f").clone();
        assert!(Devirtualize::new(&program.classes).run(&mut func));

        let calls: Vec<(&str, usize)> = func.blocks[0]
            .insts
            .iter()
            .filter_map(|i| match i {
                Inst::Call { func, args, .. } => Some((func.as_str(), args.len())),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec![("Square___init__", 2), ("Shape_area", 1)]);
        assert!(!func.blocks[0]
            .insts
            .iter()
            .any(|i| matches!(i, Inst::MethodCall { .. })));
    }

    #[test]
    fn test_parameter_receiver_is_left_alone() {
        let source = format!("{}def f(s: Shape) -> int:\n    return s.area()\n", SHAPES);
        let program = lower_ssa(&source);
        let mut func = program.function("f").expect("f").clone();
        assert!(!Devirtualize::new(&program.classes).run(&mut func));
    }
}
