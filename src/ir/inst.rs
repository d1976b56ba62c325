//! IR instructions, phi nodes and terminators.
//!
//! Every consumer matches these enums exhaustively. The use/def accessors
//! are the single source of truth for liveness, SSA renaming and the
//! optimizer's rewrites.

use super::types::{BinaryOp, Value};

/// A three-address instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    BinOp {
        dest: Value,
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },
    /// Register copy.
    Copy { dest: Value, src: Value },
    /// Reserve one 8-byte frame cell; `dest` receives its address.
    Alloc { dest: Value },
    /// Read 8 bytes from the address in `addr`.
    Load { dest: Value, addr: Value },
    /// Write `src` to the address in `addr`.
    Store { addr: Value, src: Value },
    Call {
        dest: Value,
        func: String,
        args: Vec<Value>,
    },
    MethodCall {
        dest: Value,
        receiver: Value,
        method: String,
        args: Vec<Value>,
    },
    ClosureCall {
        dest: Value,
        closure: Value,
        args: Vec<Value>,
    },
    AllocObject { dest: Value, class: String },
    GetAttr {
        dest: Value,
        object: Value,
        attr: String,
    },
    SetAttr {
        object: Value,
        attr: String,
        value: Value,
    },
    GetItem {
        dest: Value,
        container: Value,
        index: Value,
    },
    SetItem {
        container: Value,
        index: Value,
        value: Value,
    },
    MakeClosure {
        dest: Value,
        func: String,
        captures: Vec<Value>,
    },
}

impl Inst {
    /// The value this instruction defines, if any.
    pub fn def(&self) -> Option<&Value> {
        match self {
            Inst::BinOp { dest, .. }
            | Inst::Copy { dest, .. }
            | Inst::Alloc { dest }
            | Inst::Load { dest, .. }
            | Inst::Call { dest, .. }
            | Inst::MethodCall { dest, .. }
            | Inst::ClosureCall { dest, .. }
            | Inst::AllocObject { dest, .. }
            | Inst::GetAttr { dest, .. }
            | Inst::GetItem { dest, .. }
            | Inst::MakeClosure { dest, .. } => Some(dest),
            Inst::Store { .. } | Inst::SetAttr { .. } | Inst::SetItem { .. } => None,
        }
    }

    pub fn def_mut(&mut self) -> Option<&mut Value> {
        match self {
            Inst::BinOp { dest, .. }
            | Inst::Copy { dest, .. }
            | Inst::Alloc { dest }
            | Inst::Load { dest, .. }
            | Inst::Call { dest, .. }
            | Inst::MethodCall { dest, .. }
            | Inst::ClosureCall { dest, .. }
            | Inst::AllocObject { dest, .. }
            | Inst::GetAttr { dest, .. }
            | Inst::GetItem { dest, .. }
            | Inst::MakeClosure { dest, .. } => Some(dest),
            Inst::Store { .. } | Inst::SetAttr { .. } | Inst::SetItem { .. } => None,
        }
    }

    /// Operands read by this instruction, in operand order.
    pub fn uses(&self) -> Vec<&Value> {
        match self {
            Inst::BinOp { lhs, rhs, .. } => vec![lhs, rhs],
            Inst::Copy { src, .. } => vec![src],
            Inst::Alloc { .. } | Inst::AllocObject { .. } => Vec::new(),
            Inst::Load { addr, .. } => vec![addr],
            Inst::Store { addr, src } => vec![addr, src],
            Inst::Call { args, .. } => args.iter().collect(),
            Inst::MethodCall { receiver, args, .. } => {
                std::iter::once(receiver).chain(args.iter()).collect()
            }
            Inst::ClosureCall { closure, args, .. } => {
                std::iter::once(closure).chain(args.iter()).collect()
            }
            Inst::GetAttr { object, .. } => vec![object],
            Inst::SetAttr { object, value, .. } => vec![object, value],
            Inst::GetItem {
                container, index, ..
            } => vec![container, index],
            Inst::SetItem {
                container,
                index,
                value,
            } => vec![container, index, value],
            Inst::MakeClosure { captures, .. } => captures.iter().collect(),
        }
    }

    pub fn uses_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Inst::BinOp { lhs, rhs, .. } => vec![lhs, rhs],
            Inst::Copy { src, .. } => vec![src],
            Inst::Alloc { .. } | Inst::AllocObject { .. } => Vec::new(),
            Inst::Load { addr, .. } => vec![addr],
            Inst::Store { addr, src } => vec![addr, src],
            Inst::Call { args, .. } => args.iter_mut().collect(),
            Inst::MethodCall { receiver, args, .. } => {
                std::iter::once(receiver).chain(args.iter_mut()).collect()
            }
            Inst::ClosureCall { closure, args, .. } => {
                std::iter::once(closure).chain(args.iter_mut()).collect()
            }
            Inst::GetAttr { object, .. } => vec![object],
            Inst::SetAttr { object, value, .. } => vec![object, value],
            Inst::GetItem {
                container, index, ..
            } => vec![container, index],
            Inst::SetItem {
                container,
                index,
                value,
            } => vec![container, index, value],
            Inst::MakeClosure { captures, .. } => captures.iter_mut().collect(),
        }
    }

    /// Whether code generation lowers this instruction to a machine call,
    /// clobbering every caller-saved register.
    pub fn is_call_site(&self) -> bool {
        matches!(
            self,
            Inst::Call { .. }
                | Inst::MethodCall { .. }
                | Inst::ClosureCall { .. }
                | Inst::AllocObject { .. }
                | Inst::MakeClosure { .. }
                | Inst::GetItem { .. }
                | Inst::SetItem { .. }
        )
    }

    /// Removable when the result is unused. Division is excluded even though
    /// it cannot trap: every backend yields 0 for a zero divisor and MIN for
    /// MIN / -1.
    pub fn is_pure(&self) -> bool {
        match self {
            Inst::BinOp { op, .. } => *op != BinaryOp::Div,
            Inst::Copy { .. } | Inst::Alloc { .. } => true,
            _ => false,
        }
    }

    /// Short kind name used for statistics and logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Inst::BinOp { .. } => "binop",
            Inst::Copy { .. } => "copy",
            Inst::Alloc { .. } => "alloc",
            Inst::Load { .. } => "load",
            Inst::Store { .. } => "store",
            Inst::Call { .. } => "call",
            Inst::MethodCall { .. } => "method_call",
            Inst::ClosureCall { .. } => "closure_call",
            Inst::AllocObject { .. } => "alloc_object",
            Inst::GetAttr { .. } => "getattr",
            Inst::SetAttr { .. } => "setattr",
            Inst::GetItem { .. } => "getitem",
            Inst::SetItem { .. } => "setitem",
            Inst::MakeClosure { .. } => "make_closure",
        }
    }
}

/// A phi node at the head of a block.
#[derive(Debug, Clone, PartialEq)]
pub struct Phi {
    pub dest: Value,
    /// `(predecessor label, value)` pairs.
    pub incoming: Vec<(String, Value)>,
}

impl Phi {
    pub fn new(dest: Value) -> Self {
        Self {
            dest,
            incoming: Vec::new(),
        }
    }

    /// Value flowing in from the given predecessor.
    pub fn incoming_from(&self, pred: &str) -> Option<&Value> {
        self.incoming
            .iter()
            .find(|(label, _)| label == pred)
            .map(|(_, value)| value)
    }

    pub fn remove_incoming(&mut self, pred: &str) {
        self.incoming.retain(|(label, _)| label != pred);
    }
}

/// Block terminator.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Return(Option<Value>),
    Branch(String),
    CondBranch {
        cond: Value,
        if_true: String,
        if_false: String,
    },
}

impl Terminator {
    /// Successor labels in branch order.
    pub fn successors(&self) -> Vec<&str> {
        match self {
            Terminator::Return(_) => Vec::new(),
            Terminator::Branch(target) => vec![target.as_str()],
            Terminator::CondBranch {
                if_true, if_false, ..
            } => vec![if_true.as_str(), if_false.as_str()],
        }
    }

    pub fn uses(&self) -> Vec<&Value> {
        match self {
            Terminator::Return(Some(value)) => vec![value],
            Terminator::CondBranch { cond, .. } => vec![cond],
            Terminator::Return(None) | Terminator::Branch(_) => Vec::new(),
        }
    }

    pub fn uses_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Terminator::Return(Some(value)) => vec![value],
            Terminator::CondBranch { cond, .. } => vec![cond],
            Terminator::Return(None) | Terminator::Branch(_) => Vec::new(),
        }
    }

    /// Rename a successor label everywhere it appears.
    pub fn retarget(&mut self, from: &str, to: &str) {
        match self {
            Terminator::Return(_) => {}
            Terminator::Branch(target) => {
                if target == from {
                    *target = to.to_string();
                }
            }
            Terminator::CondBranch {
                if_true, if_false, ..
            } => {
                if if_true == from {
                    *if_true = to.to_string();
                }
                if if_false == from {
                    *if_false = to.to_string();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Type;

    #[test]
    fn test_use_def_contract() {
        let t0 = Value::temp(0, Type::Int);
        let t1 = Value::temp(1, Type::Int);
        let call = Inst::MethodCall {
            dest: t1.clone(),
            receiver: t0.clone(),
            method: "area".to_string(),
            args: vec![Value::int(2)],
        };
        assert_eq!(call.def(), Some(&t1));
        assert_eq!(call.uses(), vec![&t0, &Value::int(2)]);
        assert!(call.is_call_site());
        assert!(!call.is_pure());

        let store = Inst::Store {
            addr: t0.clone(),
            src: t1.clone(),
        };
        assert_eq!(store.def(), None);
        assert_eq!(store.uses().len(), 2);
    }

    #[test]
    fn test_division_is_not_pure() {
        let div = Inst::BinOp {
            dest: Value::temp(2, Type::Int),
            op: BinaryOp::Div,
            lhs: Value::int(1),
            rhs: Value::int(0),
        };
        assert!(!div.is_pure());
    }

    #[test]
    fn test_terminator_retarget() {
        let mut term = Terminator::CondBranch {
            cond: Value::bool(true),
            if_true: "a".to_string(),
            if_false: "b".to_string(),
        };
        term.retarget("b", "c");
        assert_eq!(term.successors(), vec!["a", "c"]);
    }
}
