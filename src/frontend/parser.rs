//! Recursive-descent parser producing the typed syntax tree.
//!
//! Grammar, loosely:
//!
//! ```text
//! module    := (funcdef | classdef | NEWLINE)* EOF
//! funcdef   := 'def' NAME '(' params? ')' ('->' type)? ':' suite
//! classdef  := 'class' NAME ('(' NAME (',' NAME)* ')')? ':' NEWLINE INDENT member+ DEDENT
//! member    := NAME ':' type ('=' expr)? NEWLINE | funcdef | 'pass' NEWLINE
//! suite     := simple_stmt | NEWLINE INDENT stmt+ DEDENT
//! match     := 'match' expr ':' NEWLINE INDENT case+ DEDENT
//! case      := 'case' pattern ('if' expr)? ':' suite
//! pattern   := alt ('|' alt)*
//! alt       := '_' | NAME | NAME '(' (pattern (',' pattern)*)? ')' | literal
//! expr      := or_expr
//! ```
//!
//! Binary operator precedence follows Python: `or` < `and` < `not` <
//! comparison < `|` < `^` < `&` < `+ -` < `* / //` < unary `-` < postfix.

use super::ast::*;
use super::lexer::{tokenize, Tok, Token};
use crate::core::{CompileError, CompileResult, Span};

pub fn parse_module(source: &str) -> CompileResult<Module> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse(mut self) -> CompileResult<Module> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.advance();
                }
                Tok::Def => items.push(Item::Function(self.parse_function()?)),
                Tok::Class => items.push(Item::Class(self.parse_class()?)),
                other => {
                    return Err(self.error(format!(
                        "expected 'def' or 'class' at top level, found {:?}",
                        other
                    )))
                }
            }
        }
        log::debug!("Parsed module with {} items", items.len());
        Ok(Module { items })
    }

    // ---- token helpers ----

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or_default()
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn try_consume(&mut self, tok: &Tok) -> bool {
        if self.check(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> CompileResult<()> {
        if self.try_consume(tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {:?}", what, self.peek())))
        }
    }

    fn expect_name(&mut self, what: &str) -> CompileResult<String> {
        match self.peek().clone() {
            Tok::Name(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected {}, found {:?}", what, other))),
        }
    }

    fn error(&self, message: String) -> CompileError {
        CompileError::Parse {
            span: self.span(),
            message,
        }
    }

    // ---- declarations ----

    fn parse_function(&mut self) -> CompileResult<FunctionDef> {
        let span = self.span();
        self.expect(&Tok::Def, "'def'")?;
        let name = self.expect_name("function name")?;
        self.expect(&Tok::LParen, "'('")?;

        let mut params = Vec::new();
        if !self.check(&Tok::RParen) {
            loop {
                let param_span = self.span();
                let param_name = self.expect_name("parameter name")?;
                let ty = if self.try_consume(&Tok::Colon) {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                params.push(ParamDecl {
                    name: param_name,
                    ty,
                    span: param_span,
                });
                if !self.try_consume(&Tok::Comma) || self.check(&Tok::RParen) {
                    break;
                }
            }
        }
        self.expect(&Tok::RParen, "')'")?;

        let ret = if self.try_consume(&Tok::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&Tok::Colon, "':'")?;
        let body = self.parse_suite()?;

        Ok(FunctionDef {
            name,
            params,
            ret,
            body,
            span,
        })
    }

    /// Type annotation; subscripted generics keep only the outer name.
    fn parse_type(&mut self) -> CompileResult<String> {
        let name = match self.advance() {
            Tok::Name(name) => name,
            Tok::None => "None".to_string(),
            other => return Err(self.error(format!("expected type, found {:?}", other))),
        };
        if self.try_consume(&Tok::LBracket) {
            loop {
                self.parse_type()?;
                if !self.try_consume(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RBracket, "']'")?;
        }
        Ok(name)
    }

    fn parse_class(&mut self) -> CompileResult<ClassDef> {
        let span = self.span();
        self.expect(&Tok::Class, "'class'")?;
        let name = self.expect_name("class name")?;

        let mut bases = Vec::new();
        if self.try_consume(&Tok::LParen) {
            while !self.check(&Tok::RParen) {
                bases.push(self.expect_name("base class")?);
                if !self.try_consume(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RParen, "')'")?;
        }
        self.expect(&Tok::Colon, "':'")?;
        self.expect(&Tok::Newline, "newline")?;
        self.expect(&Tok::Indent, "indented class body")?;

        let mut attrs = Vec::new();
        let mut methods = Vec::new();
        while !self.check(&Tok::Dedent) && !self.check(&Tok::Eof) {
            match self.peek().clone() {
                Tok::Def => methods.push(self.parse_function()?),
                Tok::Pass => {
                    self.advance();
                    self.expect(&Tok::Newline, "newline")?;
                }
                Tok::Newline => {
                    self.advance();
                }
                Tok::Name(attr) => {
                    self.advance();
                    self.expect(&Tok::Colon, "':' after attribute name")?;
                    let ty = self.parse_type()?;
                    // Class-level defaults are accepted but not stored; the
                    // constructor initializes attributes.
                    if self.try_consume(&Tok::Assign) {
                        self.parse_expr()?;
                    }
                    self.expect(&Tok::Newline, "newline")?;
                    attrs.push((attr, ty));
                }
                other => {
                    return Err(self.error(format!("unexpected {:?} in class body", other)));
                }
            }
        }
        self.expect(&Tok::Dedent, "end of class body")?;

        Ok(ClassDef {
            name,
            bases,
            attrs,
            methods,
            span,
        })
    }

    // ---- statements ----

    fn parse_suite(&mut self) -> CompileResult<Vec<Stmt>> {
        if !self.try_consume(&Tok::Newline) {
            return Ok(vec![self.parse_simple_stmt()?]);
        }
        self.expect(&Tok::Indent, "indented block")?;
        let mut body = Vec::new();
        while !self.check(&Tok::Dedent) && !self.check(&Tok::Eof) {
            if self.try_consume(&Tok::Newline) {
                continue;
            }
            body.push(self.parse_stmt()?);
        }
        self.expect(&Tok::Dedent, "end of block")?;
        Ok(body)
    }

    fn parse_stmt(&mut self) -> CompileResult<Stmt> {
        let span = self.span();
        match self.peek() {
            Tok::If => self.parse_if(),
            Tok::While => {
                self.advance();
                let cond = self.parse_expr()?;
                self.expect(&Tok::Colon, "':'")?;
                let body = self.parse_suite()?;
                Ok(Stmt {
                    kind: StmtKind::While { cond, body },
                    span,
                })
            }
            Tok::For => {
                self.advance();
                let target = self.expect_name("loop variable")?;
                self.expect(&Tok::In, "'in'")?;
                let iter = self.parse_expr()?;
                self.expect(&Tok::Colon, "':'")?;
                let body = self.parse_suite()?;
                Ok(Stmt {
                    kind: StmtKind::For { target, iter, body },
                    span,
                })
            }
            Tok::Def => Err(self.error("nested function definitions are not supported".to_string())),
            Tok::Name(name) if name == "match" && self.opens_block() => self.parse_match(),
            _ => self.parse_simple_stmt(),
        }
    }

    fn parse_if(&mut self) -> CompileResult<Stmt> {
        let span = self.span();
        self.expect(&Tok::If, "'if'")?;
        let cond = self.parse_expr()?;
        self.expect(&Tok::Colon, "':'")?;
        let then = self.parse_suite()?;

        let mut elifs = Vec::new();
        while self.try_consume(&Tok::Elif) {
            let elif_cond = self.parse_expr()?;
            self.expect(&Tok::Colon, "':'")?;
            elifs.push((elif_cond, self.parse_suite()?));
        }

        let orelse = if self.try_consume(&Tok::Else) {
            self.expect(&Tok::Colon, "':'")?;
            self.parse_suite()?
        } else {
            Vec::new()
        };

        Ok(Stmt {
            kind: StmtKind::If {
                cond,
                then,
                elifs,
                orelse,
            },
            span,
        })
    }

    /// Whether the current line ends in `:`. `match` and `case` are only
    /// keywords at the head of such a line.
    fn opens_block(&self) -> bool {
        let mut depth = 0usize;
        let mut last = &Tok::Eof;
        for token in &self.tokens[self.pos..] {
            match &token.tok {
                Tok::LParen | Tok::LBracket => depth += 1,
                Tok::RParen | Tok::RBracket => depth = depth.saturating_sub(1),
                Tok::Newline | Tok::Eof if depth == 0 => break,
                _ => {}
            }
            last = &token.tok;
        }
        last == &Tok::Colon
    }

    fn parse_match(&mut self) -> CompileResult<Stmt> {
        let span = self.span();
        self.advance();
        let subject = self.parse_expr()?;
        self.expect(&Tok::Colon, "':'")?;
        self.expect(&Tok::Newline, "newline")?;
        self.expect(&Tok::Indent, "indented case block")?;

        let mut cases = Vec::new();
        loop {
            if self.try_consume(&Tok::Newline) {
                continue;
            }
            match self.peek() {
                Tok::Name(name) if name == "case" => {}
                _ => break,
            }
            let case_span = self.span();
            self.advance();
            let pattern = self.parse_pattern()?;
            let guard = if self.try_consume(&Tok::If) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect(&Tok::Colon, "':'")?;
            let body = self.parse_suite()?;
            cases.push(MatchCase {
                pattern,
                guard,
                body,
                span: case_span,
            });
        }
        if cases.is_empty() {
            return Err(self.error("expected 'case'".to_string()));
        }
        self.expect(&Tok::Dedent, "end of match block")?;
        Ok(Stmt {
            kind: StmtKind::Match { subject, cases },
            span,
        })
    }

    fn parse_pattern(&mut self) -> CompileResult<Pattern> {
        let first = self.parse_pattern_alt()?;
        if !self.check(&Tok::Pipe) {
            return Ok(first);
        }
        let mut alts = vec![first];
        while self.try_consume(&Tok::Pipe) {
            alts.push(self.parse_pattern_alt()?);
        }
        Ok(Pattern::Or(alts))
    }

    fn parse_pattern_alt(&mut self) -> CompileResult<Pattern> {
        let span = self.span();
        match self.peek().clone() {
            Tok::Name(name) => {
                self.advance();
                if name == "_" {
                    return Ok(Pattern::Wildcard);
                }
                if !self.try_consume(&Tok::LParen) {
                    return Ok(Pattern::Capture(name));
                }
                let mut args = Vec::new();
                while !self.check(&Tok::RParen) {
                    args.push(self.parse_pattern()?);
                    if !self.try_consume(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(&Tok::RParen, "')'")?;
                Ok(Pattern::Class { name, args })
            }
            Tok::Int(_) | Tok::Minus | Tok::True | Tok::False | Tok::None => {
                let literal = self.parse_unary()?;
                match literal.kind {
                    ExprKind::Int(_) | ExprKind::Bool(_) | ExprKind::NoneLit => {
                        Ok(Pattern::Literal(literal))
                    }
                    _ => Err(CompileError::Parse {
                        span,
                        message: "expected a literal pattern".to_string(),
                    }),
                }
            }
            Tok::LParen => {
                self.advance();
                let inner = self.parse_pattern()?;
                self.expect(&Tok::RParen, "')'")?;
                Ok(inner)
            }
            other => Err(self.error(format!("expected pattern, found {:?}", other))),
        }
    }

    /// A statement that fits on one line, followed by its newline.
    fn parse_simple_stmt(&mut self) -> CompileResult<Stmt> {
        let span = self.span();
        let kind = match self.peek() {
            Tok::Return => {
                self.advance();
                if self.check(&Tok::Newline) {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_expr()?))
                }
            }
            Tok::Yield => {
                self.advance();
                if self.check(&Tok::Newline) {
                    StmtKind::Yield(None)
                } else {
                    StmtKind::Yield(Some(self.parse_expr()?))
                }
            }
            Tok::Break => {
                self.advance();
                StmtKind::Break
            }
            Tok::Continue => {
                self.advance();
                StmtKind::Continue
            }
            Tok::Pass => {
                self.advance();
                StmtKind::Pass
            }
            _ => self.parse_expr_or_assign()?,
        };
        self.expect(&Tok::Newline, "end of statement")?;
        Ok(Stmt { kind, span })
    }

    fn parse_expr_or_assign(&mut self) -> CompileResult<StmtKind> {
        // `name: type = value` declares a local.
        if matches!(self.peek(), Tok::Name(_)) && self.peek_at(1) == &Tok::Colon {
            let name = self.expect_name("variable name")?;
            self.advance();
            self.parse_type()?;
            self.expect(&Tok::Assign, "'=' in annotated assignment")?;
            let value = self.parse_expr()?;
            return Ok(StmtKind::Assign {
                target: Target::Name(name),
                value,
            });
        }

        let expr = self.parse_expr()?;
        let aug = match self.peek() {
            Tok::Assign => None,
            Tok::PlusAssign => Some(ArithOp::Add),
            Tok::MinusAssign => Some(ArithOp::Sub),
            Tok::StarAssign => Some(ArithOp::Mul),
            _ => return Ok(StmtKind::Expr(expr)),
        };
        let op_span = self.span();
        self.advance();
        let rhs = self.parse_expr()?;

        let target = self.to_target(expr.clone(), op_span)?;
        let value = match aug {
            None => rhs,
            Some(op) => Expr::new(
                ExprKind::Arith {
                    op,
                    lhs: Box::new(expr),
                    rhs: Box::new(rhs),
                },
                op_span,
            ),
        };
        Ok(StmtKind::Assign { target, value })
    }

    fn to_target(&self, expr: Expr, span: Span) -> CompileResult<Target> {
        match expr.kind {
            ExprKind::Name(name) => Ok(Target::Name(name)),
            ExprKind::Attribute { object, attr } => Ok(Target::Attr {
                object: *object,
                attr,
            }),
            ExprKind::Subscript { container, index } => Ok(Target::Index {
                container: *container,
                index: *index,
            }),
            other => Err(CompileError::Parse {
                span,
                message: format!("cannot assign to {}", other.describe()),
            }),
        }
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> CompileResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> CompileResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.check(&Tok::Or) {
            let span = self.span();
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::new(
                ExprKind::Logic {
                    op: BoolOp::Or,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> CompileResult<Expr> {
        let mut lhs = self.parse_not()?;
        while self.check(&Tok::And) {
            let span = self.span();
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::new(
                ExprKind::Logic {
                    op: BoolOp::And,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> CompileResult<Expr> {
        if self.check(&Tok::Not) {
            let span = self.span();
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Expr::new(ExprKind::Not(Box::new(inner)), span));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> CompileResult<Expr> {
        let lhs = self.parse_bitor()?;
        let op = match self.peek() {
            Tok::EqEq => CompareOp::Eq,
            Tok::NotEq => CompareOp::Ne,
            Tok::Lt => CompareOp::Lt,
            Tok::Le => CompareOp::Le,
            Tok::Gt => CompareOp::Gt,
            Tok::Ge => CompareOp::Ge,
            _ => return Ok(lhs),
        };
        let span = self.span();
        self.advance();
        let rhs = self.parse_bitor()?;
        Ok(Expr::new(
            ExprKind::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        ))
    }

    fn parse_binary_level(
        &mut self,
        table: &[(Tok, ArithOp)],
        next: fn(&mut Parser) -> CompileResult<Expr>,
    ) -> CompileResult<Expr> {
        let mut lhs = next(self)?;
        loop {
            let Some(op) = table
                .iter()
                .find(|(tok, _)| self.check(tok))
                .map(|(_, op)| *op)
            else {
                return Ok(lhs);
            };
            let span = self.span();
            self.advance();
            let rhs = next(self)?;
            lhs = Expr::new(
                ExprKind::Arith {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    fn parse_bitor(&mut self) -> CompileResult<Expr> {
        self.parse_binary_level(&[(Tok::Pipe, ArithOp::BitOr)], Parser::parse_bitxor)
    }

    fn parse_bitxor(&mut self) -> CompileResult<Expr> {
        self.parse_binary_level(&[(Tok::Caret, ArithOp::BitXor)], Parser::parse_bitand)
    }

    fn parse_bitand(&mut self) -> CompileResult<Expr> {
        self.parse_binary_level(&[(Tok::Amp, ArithOp::BitAnd)], Parser::parse_additive)
    }

    fn parse_additive(&mut self) -> CompileResult<Expr> {
        self.parse_binary_level(
            &[(Tok::Plus, ArithOp::Add), (Tok::Minus, ArithOp::Sub)],
            Parser::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> CompileResult<Expr> {
        self.parse_binary_level(
            &[
                (Tok::Star, ArithOp::Mul),
                (Tok::Slash, ArithOp::Div),
                (Tok::DoubleSlash, ArithOp::Div),
            ],
            Parser::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> CompileResult<Expr> {
        let span = self.span();
        if self.try_consume(&Tok::Minus) {
            let inner = self.parse_unary()?;
            // Fold negative literals so i64::MIN-adjacent constants survive.
            if let ExprKind::Int(v) = inner.kind {
                return Ok(Expr::new(ExprKind::Int(v.wrapping_neg()), span));
            }
            return Ok(Expr::new(ExprKind::Neg(Box::new(inner)), span));
        }
        if self.try_consume(&Tok::Plus) {
            return self.parse_unary();
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> CompileResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            let span = self.span();
            if self.try_consume(&Tok::Dot) {
                let name = self.expect_name("attribute name")?;
                if self.try_consume(&Tok::LParen) {
                    let args = self.parse_args()?;
                    expr = Expr::new(
                        ExprKind::MethodCall {
                            object: Box::new(expr),
                            method: name,
                            args,
                        },
                        span,
                    );
                } else {
                    expr = Expr::new(
                        ExprKind::Attribute {
                            object: Box::new(expr),
                            attr: name,
                        },
                        span,
                    );
                }
            } else if self.try_consume(&Tok::LBracket) {
                let index = self.parse_expr()?;
                self.expect(&Tok::RBracket, "']'")?;
                expr = Expr::new(
                    ExprKind::Subscript {
                        container: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else if self.check(&Tok::LParen) {
                let ExprKind::Name(func) = &expr.kind else {
                    return Err(self.error("only named functions can be called".to_string()));
                };
                let func = func.clone();
                let call_span = expr.span;
                self.advance();
                let args = self.parse_args()?;
                expr = Expr::new(ExprKind::Call { func, args }, call_span);
            } else {
                return Ok(expr);
            }
        }
    }

    /// Arguments after the opening parenthesis, through the closing one.
    fn parse_args(&mut self) -> CompileResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.check(&Tok::RParen) {
            args.push(self.parse_expr()?);
            if !self.try_consume(&Tok::Comma) {
                break;
            }
        }
        self.expect(&Tok::RParen, "')'")?;
        Ok(args)
    }

    fn parse_atom(&mut self) -> CompileResult<Expr> {
        let span = self.span();
        let kind = match self.advance() {
            Tok::Int(v) => ExprKind::Int(v),
            Tok::True => ExprKind::Bool(true),
            Tok::False => ExprKind::Bool(false),
            Tok::None => ExprKind::NoneLit,
            Tok::Str(s) => ExprKind::Str(s),
            Tok::Name(name) => ExprKind::Name(name),
            Tok::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Tok::RParen, "')'")?;
                return Ok(inner);
            }
            Tok::LBracket => {
                let mut elems = Vec::new();
                while !self.check(&Tok::RBracket) {
                    elems.push(self.parse_expr()?);
                    if !self.try_consume(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(&Tok::RBracket, "']'")?;
                ExprKind::List(elems)
            }
            other => {
                return Err(CompileError::Parse {
                    span,
                    message: format!("expected expression, found {:?}", other),
                })
            }
        };
        Ok(Expr::new(kind, span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_fn(source: &str) -> FunctionDef {
        let module = parse_module(source).expect("parse");
        match module.items.into_iter().next() {
            Some(Item::Function(f)) => f,
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_add() {
        let f = parse_fn("def add(a: int, b: int) -> int:\n    return a + b\n");
        assert_eq!(f.name, "add");
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[1].ty.as_deref(), Some("int"));
        assert_eq!(f.ret.as_deref(), Some("int"));
        match &f.body[0].kind {
            StmtKind::Return(Some(Expr {
                kind: ExprKind::Arith { op: ArithOp::Add, .. },
                ..
            })) => {}
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let f = parse_fn("def f(a: int) -> bool:\n    return a + 1 * 2 < 3 and not a == 0\n");
        let StmtKind::Return(Some(expr)) = &f.body[0].kind else {
            panic!("expected return");
        };
        let ExprKind::Logic { op: BoolOp::And, lhs, rhs } = &expr.kind else {
            panic!("expected and, got {:?}", expr.kind);
        };
        assert!(matches!(lhs.kind, ExprKind::Compare { op: CompareOp::Lt, .. }));
        assert!(matches!(rhs.kind, ExprKind::Not(_)));
    }

    #[test]
    fn test_if_elif_else_and_loops() {
        let source = "\
def f(n: int) -> int:
    total = 0
    for i in range(n):
        if i == 3:
            continue
        elif i > 7:
            break
        else:
            total += i
    while total > 100:
        total = total - 1
    return total
";
        let f = parse_fn(source);
        assert_eq!(f.body.len(), 4);
        let StmtKind::For { target, body, .. } = &f.body[1].kind else {
            panic!("expected for");
        };
        assert_eq!(target, "i");
        let StmtKind::If { elifs, orelse, .. } = &body[0].kind else {
            panic!("expected if");
        };
        assert_eq!(elifs.len(), 1);
        assert!(matches!(
            orelse[0].kind,
            StmtKind::Assign {
                value: Expr { kind: ExprKind::Arith { op: ArithOp::Add, .. }, .. },
                ..
            }
        ));
    }

    #[test]
    fn test_class_with_methods() {
        let source = "\
class Point(Base):
    x: int
    y: int

    def sum(self) -> int:
        return self.x + self.y
";
        let module = parse_module(source).expect("parse");
        let Item::Class(class) = &module.items[0] else {
            panic!("expected class");
        };
        assert_eq!(class.bases, vec!["Base".to_string()]);
        assert_eq!(class.attrs.len(), 2);
        assert_eq!(class.methods[0].name, "sum");
    }

    #[test]
    fn test_attribute_and_subscript_targets() {
        let f = parse_fn("def f(p: Point, xs: list) -> None:\n    p.x = xs[0]\n    xs[1] = p.sum()\n");
        assert!(matches!(
            &f.body[0].kind,
            StmtKind::Assign { target: Target::Attr { .. }, value: Expr { kind: ExprKind::Subscript { .. }, .. } }
        ));
        assert!(matches!(
            &f.body[1].kind,
            StmtKind::Assign { target: Target::Index { .. }, value: Expr { kind: ExprKind::MethodCall { .. }, .. } }
        ));
    }

    #[test]
    fn test_negative_literal_folds() {
        let f = parse_fn("def f() -> int:\n    return -5\n");
        assert!(matches!(
            f.body[0].kind,
            StmtKind::Return(Some(Expr { kind: ExprKind::Int(-5), .. }))
        ));
    }

    #[test]
    fn test_parse_error_has_span() {
        let err = parse_module("def f(:\n    return 1\n").unwrap_err();
        assert!(err.to_string().starts_with("1:7: parse error"), "{}", err);
    }

    #[test]
    fn test_match_statement() {
        let source = "\
def f(x: int) -> int:
    match x:
        case 0 | -1:
            return 0
        case n if n > 10:
            return n
        case _:
            pass
    match = 3
    return match
";
        let f = parse_fn(source);
        let StmtKind::Match { subject, cases } = &f.body[0].kind else {
            panic!("expected match, got {:?}", f.body[0].kind);
        };
        assert!(matches!(subject.kind, ExprKind::Name(ref n) if n == "x"));
        assert_eq!(cases.len(), 3);
        let Pattern::Or(alts) = &cases[0].pattern else {
            panic!("expected or-pattern");
        };
        assert!(matches!(alts[1], Pattern::Literal(Expr { kind: ExprKind::Int(-1), .. })));
        assert_eq!(cases[1].pattern, Pattern::Capture("n".to_string()));
        assert!(cases[1].guard.is_some());
        assert_eq!(cases[2].pattern, Pattern::Wildcard);
        // `match` stays an ordinary name outside a block header.
        assert!(matches!(f.body[1].kind, StmtKind::Assign { .. }));
    }

    #[test]
    fn test_class_pattern() {
        let source = "def f(p: Point) -> int:\n    match p:\n        case Point():\n            return 1\n";
        let f = parse_fn(source);
        let StmtKind::Match { cases, .. } = &f.body[0].kind else {
            panic!("expected match");
        };
        assert_eq!(
            cases[0].pattern,
            Pattern::Class { name: "Point".to_string(), args: vec![] }
        );
    }

    #[test]
    fn test_single_line_suite() {
        let f = parse_fn("def f(a: int) -> int:\n    if a: return 1\n    return 0\n");
        let StmtKind::If { then, .. } = &f.body[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(then[0].kind, StmtKind::Return(Some(_))));
    }
}
