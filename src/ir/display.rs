//! Textual form of the IR, printed by `--emit-ir` and used in tests.

use std::fmt;

use super::inst::{Inst, Phi, Terminator};
use super::program::{Block, Function, Program};

fn join(values: &[super::Value]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::BinOp { dest, op, lhs, rhs } => write!(f, "{} = {} {}, {}", dest, op, lhs, rhs),
            Inst::Copy { dest, src } => write!(f, "{} = copy {}", dest, src),
            Inst::Alloc { dest } => write!(f, "{} = alloc", dest),
            Inst::Load { dest, addr } => write!(f, "{} = load [{}]", dest, addr),
            Inst::Store { addr, src } => write!(f, "store [{}], {}", addr, src),
            Inst::Call { dest, func, args } => {
                write!(f, "{} = call @{}({})", dest, func, join(args))
            }
            Inst::MethodCall {
                dest,
                receiver,
                method,
                args,
            } => write!(f, "{} = call {}.{}({})", dest, receiver, method, join(args)),
            Inst::ClosureCall {
                dest,
                closure,
                args,
            } => write!(f, "{} = call *{}({})", dest, closure, join(args)),
            Inst::AllocObject { dest, class } => write!(f, "{} = new {}", dest, class),
            Inst::GetAttr { dest, object, attr } => write!(f, "{} = {}.{}", dest, object, attr),
            Inst::SetAttr {
                object,
                attr,
                value,
            } => write!(f, "{}.{} = {}", object, attr, value),
            Inst::GetItem {
                dest,
                container,
                index,
            } => write!(f, "{} = {}[{}]", dest, container, index),
            Inst::SetItem {
                container,
                index,
                value,
            } => write!(f, "{}[{}] = {}", container, index, value),
            Inst::MakeClosure {
                dest,
                func,
                captures,
            } => write!(f, "{} = closure @{}[{}]", dest, func, join(captures)),
        }
    }
}

impl fmt::Display for Phi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let incoming = self
            .incoming
            .iter()
            .map(|(label, value)| format!("[{}: {}]", label, value))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{} = phi {}", self.dest, incoming)
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Return(Some(value)) => write!(f, "ret {}", value),
            Terminator::Return(None) => f.write_str("ret"),
            Terminator::Branch(target) => write!(f, "br {}", target),
            Terminator::CondBranch {
                cond,
                if_true,
                if_false,
            } => write!(f, "br {}, {}, {}", cond, if_true, if_false),
        }
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.label)?;
        for phi in &self.phis {
            writeln!(f, "  {}", phi)?;
        }
        for inst in &self.insts {
            writeln!(f, "  {}", inst)?;
        }
        writeln!(f, "  {}", self.term)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|p| format!("%{}: {}", p.name, p.ty))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "fn {}({}) -> {} {{", self.name, params, self.ret)?;
        for block in &self.blocks {
            write!(f, "{}", block)?;
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for class in self.classes.iter() {
            let attrs = class
                .attrs
                .iter()
                .map(|(name, ty)| format!("{}: {}", name, ty))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(f, "class {}({}) {{ {} }}", class.name, class.bases.join(", "), attrs)?;
        }
        for (i, function) in self.functions.iter().enumerate() {
            if i > 0 || self.classes.iter().next().is_some() {
                writeln!(f)?;
            }
            write!(f, "{}", function)?;
        }
        Ok(())
    }
}
