//! IR types, values and operators.

use std::fmt;

/// Static type of an IR value. Every value occupies one 64-bit word; the type
/// only drives attribute resolution and printing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Bool,
    Float,
    Str,
    List,
    Dict,
    Class(String),
    Function,
    Closure,
    Ptr,
    None,
}

impl Type {
    /// Resolve a source annotation; unknown names are class types.
    pub fn from_annotation(name: &str) -> Type {
        match name {
            "int" => Type::Int,
            "bool" => Type::Bool,
            "float" => Type::Float,
            "str" => Type::Str,
            "list" => Type::List,
            "dict" => Type::Dict,
            "None" => Type::None,
            "Callable" | "function" => Type::Closure,
            other => Type::Class(other.to_string()),
        }
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            Type::Class(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => f.write_str("int"),
            Type::Bool => f.write_str("bool"),
            Type::Float => f.write_str("float"),
            Type::Str => f.write_str("str"),
            Type::List => f.write_str("list"),
            Type::Dict => f.write_str("dict"),
            Type::Class(name) => write!(f, "{}", name),
            Type::Function => f.write_str("fn"),
            Type::Closure => f.write_str("closure"),
            Type::Ptr => f.write_str("ptr"),
            Type::None => f.write_str("none"),
        }
    }
}

/// Identity of a value that needs a location. Constants have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKey {
    Temp(u32),
    Param(u32),
}

impl fmt::Display for ValueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKey::Temp(id) => write!(f, "%t{}", id),
            ValueKey::Param(index) => write!(f, "%arg{}", index),
        }
    }
}

/// An IR operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Temp { id: u32, ty: Type },
    Const { val: i64, ty: Type },
    Param { index: u32, name: String, ty: Type },
}

impl Value {
    pub fn temp(id: u32, ty: Type) -> Value {
        Value::Temp { id, ty }
    }

    pub fn int(val: i64) -> Value {
        Value::Const { val, ty: Type::Int }
    }

    pub fn bool(val: bool) -> Value {
        Value::Const {
            val: val as i64,
            ty: Type::Bool,
        }
    }

    pub fn param(index: u32, name: impl Into<String>, ty: Type) -> Value {
        Value::Param {
            index,
            name: name.into(),
            ty,
        }
    }

    pub fn ty(&self) -> &Type {
        match self {
            Value::Temp { ty, .. } | Value::Const { ty, .. } | Value::Param { ty, .. } => ty,
        }
    }

    pub fn key(&self) -> Option<ValueKey> {
        match self {
            Value::Temp { id, .. } => Some(ValueKey::Temp(*id)),
            Value::Param { index, .. } => Some(ValueKey::Param(*index)),
            Value::Const { .. } => None,
        }
    }

    pub fn as_const(&self) -> Option<i64> {
        match self {
            Value::Const { val, .. } => Some(*val),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Value::Const { .. })
    }

    pub fn is_const_value(&self, v: i64) -> bool {
        self.as_const() == Some(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Temp { id, .. } => write!(f, "%t{}", id),
            Value::Const { val, .. } => write!(f, "{}", val),
            Value::Param { name, .. } => write!(f, "%{}", name),
        }
    }
}

/// Binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Xor
        )
    }

    /// Integer semantics: wrapping arithmetic, division by zero yields 0,
    /// comparisons yield 1 or 0.
    pub fn evaluate(&self, lhs: i64, rhs: i64) -> i64 {
        match self {
            BinaryOp::Add => lhs.wrapping_add(rhs),
            BinaryOp::Sub => lhs.wrapping_sub(rhs),
            BinaryOp::Mul => lhs.wrapping_mul(rhs),
            BinaryOp::Div => {
                if rhs == 0 {
                    0
                } else {
                    lhs.wrapping_div(rhs)
                }
            }
            BinaryOp::Eq => (lhs == rhs) as i64,
            BinaryOp::Ne => (lhs != rhs) as i64,
            BinaryOp::Lt => (lhs < rhs) as i64,
            BinaryOp::Le => (lhs <= rhs) as i64,
            BinaryOp::Gt => (lhs > rhs) as i64,
            BinaryOp::Ge => (lhs >= rhs) as i64,
            BinaryOp::And => lhs & rhs,
            BinaryOp::Or => lhs | rhs,
            BinaryOp::Xor => lhs ^ rhs,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_division_by_zero() {
        assert_eq!(BinaryOp::Div.evaluate(7, 0), 0);
        assert_eq!(BinaryOp::Div.evaluate(-7, 2), -3);
        assert_eq!(BinaryOp::Div.evaluate(i64::MIN, -1), i64::MIN);
    }

    #[test]
    fn test_evaluate_comparisons() {
        assert_eq!(BinaryOp::Lt.evaluate(-1, 0), 1);
        assert_eq!(BinaryOp::Ge.evaluate(3, 3), 1);
        assert_eq!(BinaryOp::Ne.evaluate(3, 3), 0);
    }

    #[test]
    fn test_value_keys() {
        assert_eq!(Value::temp(4, Type::Int).key(), Some(ValueKey::Temp(4)));
        assert_eq!(Value::param(1, "b", Type::Int).key(), Some(ValueKey::Param(1)));
        assert_eq!(Value::int(9).key(), None);
    }

    #[test]
    fn test_type_from_annotation() {
        assert_eq!(Type::from_annotation("int"), Type::Int);
        assert_eq!(
            Type::from_annotation("Point"),
            Type::Class("Point".to_string())
        );
    }
}
