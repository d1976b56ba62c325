//! Typed syntax tree handed from the parser to the IR builder.
//!
//! Types come from source annotations. Every statement and expression keeps
//! the span of its first token so build errors can point at source.

use crate::core::Span;

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Function(FunctionDef),
    Class(ClassDef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<ParamDecl>,
    /// Return annotation; `None` when omitted.
    pub ret: Option<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub name: String,
    pub ty: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<String>,
    /// Annotated attributes, `name: type`.
    pub attrs: Vec<(String, String)>,
    pub methods: Vec<FunctionDef>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Return(Option<Expr>),
    Assign { target: Target, value: Expr },
    Expr(Expr),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        elifs: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
    },
    While { cond: Expr, body: Vec<Stmt> },
    For {
        target: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Match {
        subject: Expr,
        cases: Vec<MatchCase>,
    },
    Break,
    Continue,
    Pass,
    Yield(Option<Expr>),
}

impl StmtKind {
    pub fn describe(&self) -> &'static str {
        match self {
            StmtKind::Return(_) => "return",
            StmtKind::Assign { .. } => "assignment",
            StmtKind::Expr(_) => "expression statement",
            StmtKind::If { .. } => "if",
            StmtKind::While { .. } => "while",
            StmtKind::For { .. } => "for",
            StmtKind::Match { .. } => "match",
            StmtKind::Break => "break",
            StmtKind::Continue => "continue",
            StmtKind::Pass => "pass",
            StmtKind::Yield(_) => "yield",
        }
    }
}

/// One `case` arm of a `match` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// `_`; matches anything and binds nothing.
    Wildcard,
    /// A bare name; matches anything and binds the subject.
    Capture(String),
    /// Integer, boolean or `None` literal compared for equality.
    Literal(Expr),
    Or(Vec<Pattern>),
    /// `Name(...)`, matched against the subject's static class.
    Class { name: String, args: Vec<Pattern> },
}

impl Pattern {
    /// Names the pattern binds, in source order.
    pub fn captures(&self) -> Vec<&str> {
        match self {
            Pattern::Capture(name) => vec![name.as_str()],
            Pattern::Or(alts) => alts.iter().flat_map(Pattern::captures).collect(),
            Pattern::Class { args, .. } => args.iter().flat_map(Pattern::captures).collect(),
            Pattern::Wildcard | Pattern::Literal(_) => Vec::new(),
        }
    }
}

/// Assignment target.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Attr { object: Expr, attr: String },
    Index { container: Expr, index: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    BitAnd,
    BitOr,
    BitXor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Bool(bool),
    NoneLit,
    Str(String),
    Name(String),
    Arith {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logic {
        op: BoolOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Call { func: String, args: Vec<Expr> },
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Attribute { object: Box<Expr>, attr: String },
    Subscript {
        container: Box<Expr>,
        index: Box<Expr>,
    },
    List(Vec<Expr>),
}

impl ExprKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ExprKind::Int(_) => "integer literal",
            ExprKind::Bool(_) => "boolean literal",
            ExprKind::NoneLit => "None",
            ExprKind::Str(_) => "string literal",
            ExprKind::Name(_) => "name",
            ExprKind::Arith { .. } => "arithmetic",
            ExprKind::Compare { .. } => "comparison",
            ExprKind::Logic { .. } => "boolean operator",
            ExprKind::Not(_) => "not",
            ExprKind::Neg(_) => "negation",
            ExprKind::Call { .. } => "call",
            ExprKind::MethodCall { .. } => "method call",
            ExprKind::Attribute { .. } => "attribute",
            ExprKind::Subscript { .. } => "subscript",
            ExprKind::List(_) => "list literal",
        }
    }
}
