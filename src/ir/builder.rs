// Lowering from the typed syntax tree to block-structured IR. Each function is
// built independently against a read-only module context holding the class
// table and the return type of every callable symbol. Names are bound in a
// scope map; every name that is assigned anywhere in a function body gets a
// dedicated variable temporary and each assignment copies into it, which
// leaves SSA construction to introduce phis and fresh names. Control flow is
// lowered into explicitly labelled blocks, boolean operators short-circuit
// through their own blocks, and any construct the backend cannot lower makes
// the whole function fail with a spanned error while other functions still
// build.

//! AST to IR lowering.

use hashbrown::{HashMap, HashSet};

use crate::core::{CompileError, CompileResult, FunctionFailure, Span, Stage};
use crate::frontend::ast::{
    ArithOp, BoolOp, ClassDef, CompareOp, Expr, ExprKind, FunctionDef, Item, MatchCase, Module,
    Pattern, Stmt, StmtKind, Target,
};

use super::inst::{Inst, Phi, Terminator};
use super::program::{method_symbol, Block, ClassInfo, ClassTable, Function, Param, Program};
use super::types::{BinaryOp, Type, Value};

/// Name of the constructor method invoked after `AllocObject`.
pub const CONSTRUCTOR: &str = "__init__";

/// Lower a parsed module. Functions that fail to build are reported and left
/// out of the program.
pub fn build_program(module: &Module) -> (Program, Vec<FunctionFailure>) {
    let ctx = ModuleContext::new(module);
    let mut functions = Vec::new();
    let mut failures = Vec::new();

    let mut build = |symbol: String, def: &FunctionDef, class: Option<&str>| {
        match FunctionBuilder::new(&ctx, symbol.clone(), def, class).build(def) {
            Ok(func) => {
                log::debug!(
                    "Built {} with {} blocks, {} instructions",
                    func.name,
                    func.blocks.len(),
                    func.instruction_count()
                );
                functions.push(func);
            }
            Err(error) => {
                log::debug!("Build of {} failed: {}", symbol, error);
                failures.push(FunctionFailure::new(symbol, Stage::Build, error));
            }
        }
    };

    for item in &module.items {
        match item {
            Item::Function(def) => build(def.name.clone(), def, None),
            Item::Class(class) => {
                for method in &class.methods {
                    build(method_symbol(&class.name, &method.name), method, Some(&class.name));
                }
            }
        }
    }

    let program = Program {
        functions,
        classes: ctx.classes,
    };
    (program, failures)
}

/// Read-only facts shared by every function build.
struct ModuleContext {
    classes: ClassTable,
    /// Return type of every free function and lowered method.
    signatures: HashMap<String, Type>,
}

impl ModuleContext {
    fn new(module: &Module) -> Self {
        let mut classes = ClassTable::new();
        let mut signatures = HashMap::new();

        for item in &module.items {
            match item {
                Item::Function(def) => {
                    signatures.insert(def.name.clone(), return_type(def));
                }
                Item::Class(class) => {
                    classes.insert(class_info(class));
                    for method in &class.methods {
                        signatures.insert(method_symbol(&class.name, &method.name), return_type(method));
                    }
                }
            }
        }

        Self {
            classes,
            signatures,
        }
    }
}

fn class_info(class: &ClassDef) -> ClassInfo {
    ClassInfo {
        name: class.name.clone(),
        bases: class.bases.clone(),
        attrs: class
            .attrs
            .iter()
            .map(|(name, ty)| (name.clone(), Type::from_annotation(ty)))
            .collect(),
        methods: class.methods.iter().map(|m| m.name.clone()).collect(),
    }
}

fn return_type(def: &FunctionDef) -> Type {
    def.ret
        .as_deref()
        .map(Type::from_annotation)
        .unwrap_or(Type::None)
}

/// Block under construction; it has no terminator yet.
struct OpenBlock {
    label: String,
    phis: Vec<Phi>,
    insts: Vec<Inst>,
}

struct LoopContext {
    break_to: String,
    continue_to: String,
}

struct FunctionBuilder<'ctx> {
    ctx: &'ctx ModuleContext,
    func: Function,
    scope: HashMap<String, Value>,
    current: Option<OpenBlock>,
    loops: Vec<LoopContext>,
    next_id: u32,
}

impl<'ctx> FunctionBuilder<'ctx> {
    fn new(ctx: &'ctx ModuleContext, symbol: String, def: &FunctionDef, class: Option<&str>) -> Self {
        let params = def
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let ty = match (&p.ty, class) {
                    (Some(annotation), _) => Type::from_annotation(annotation),
                    (None, Some(class)) if i == 0 => Type::Class(class.to_string()),
                    (None, _) => Type::Int,
                };
                Param {
                    name: p.name.clone(),
                    ty,
                }
            })
            .collect();

        let func = Function::new(symbol, params, return_type(def));
        let mut scope = HashMap::new();
        for (i, p) in func.params.iter().enumerate() {
            scope.insert(p.name.clone(), Value::param(i as u32, p.name.clone(), p.ty.clone()));
        }

        Self {
            ctx,
            func,
            scope,
            current: None,
            loops: Vec::new(),
            next_id: 0,
        }
    }

    fn build(mut self, def: &FunctionDef) -> CompileResult<Function> {
        self.start_block("entry".to_string());

        let mut assigned = HashSet::new();
        collect_assigned(&def.body, &mut assigned);
        for index in 0..self.func.params.len() {
            let param = &self.func.params[index];
            if !assigned.contains(&param.name) {
                continue;
            }
            let name = param.name.clone();
            let ty = param.ty.clone();
            let incoming = Value::param(index as u32, name.clone(), ty.clone());
            let var = self.func.new_temp(ty);
            self.emit(Inst::Copy {
                dest: var.clone(),
                src: incoming,
            });
            self.scope.insert(name, var);
        }

        self.lower_stmts(&def.body)?;
        if self.current.is_some() {
            self.terminate(Terminator::Return(None));
        }
        Ok(self.func)
    }

    // ---- block plumbing ----

    fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn start_block(&mut self, label: String) {
        debug_assert!(self.current.is_none(), "previous block left open");
        self.current = Some(OpenBlock {
            label,
            phis: Vec::new(),
            insts: Vec::new(),
        });
    }

    fn open(&mut self) -> CompileResult<&mut OpenBlock> {
        self.current.as_mut().ok_or_else(|| CompileError::BlockLayout {
            reason: "no open block to append to".to_string(),
        })
    }

    fn current_label(&self) -> CompileResult<String> {
        self.current
            .as_ref()
            .map(|b| b.label.clone())
            .ok_or_else(|| CompileError::BlockLayout {
                reason: "no open block".to_string(),
            })
    }

    fn emit(&mut self, inst: Inst) {
        if let Some(block) = self.current.as_mut() {
            block.insts.push(inst);
        }
    }

    /// Close the open block. A no-op once the block is already terminated.
    fn terminate(&mut self, term: Terminator) {
        if let Some(open) = self.current.take() {
            let mut block = Block::new(open.label, term);
            block.phis = open.phis;
            block.insts = open.insts;
            self.func.blocks.push(block);
        }
    }

    /// Branch to `target` if the open block falls through. Returns whether a
    /// branch was emitted.
    fn jump_to(&mut self, target: &str) -> bool {
        if self.current.is_some() {
            self.terminate(Terminator::Branch(target.to_string()));
            true
        } else {
            false
        }
    }

    // ---- statements ----

    fn lower_stmts(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        for (i, stmt) in stmts.iter().enumerate() {
            if self.current.is_none() {
                log::trace!(
                    "{}: skipping {} unreachable statement(s) at {}",
                    self.func.name,
                    stmts.len() - i,
                    stmt.span
                );
                break;
            }
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Return(value) => {
                let value = value.as_ref().map(|e| self.lower_expr(e)).transpose()?;
                self.terminate(Terminator::Return(value));
            }
            StmtKind::Assign { target, value } => {
                let value = self.lower_expr(value)?;
                match target {
                    Target::Name(name) => self.assign(name, value),
                    Target::Attr { object, attr } => {
                        let object = self.lower_expr(object)?;
                        self.emit(Inst::SetAttr {
                            object,
                            attr: attr.clone(),
                            value,
                        });
                    }
                    Target::Index { container, index } => {
                        let container = self.lower_expr(container)?;
                        let index = self.lower_expr(index)?;
                        self.emit(Inst::SetItem {
                            container,
                            index,
                            value,
                        });
                    }
                }
            }
            StmtKind::Expr(expr) => {
                self.lower_expr(expr)?;
            }
            StmtKind::Pass => {}
            StmtKind::If {
                cond,
                then,
                elifs,
                orelse,
            } => self.lower_if(cond, then, elifs, orelse)?,
            StmtKind::While { cond, body } => self.lower_while(cond, body)?,
            StmtKind::For { target, iter, body } => self.lower_for(target, iter, body)?,
            StmtKind::Match { subject, cases } => self.lower_match(subject, cases)?,
            StmtKind::Break | StmtKind::Continue => {
                let is_break = matches!(stmt.kind, StmtKind::Break);
                let Some(ctx) = self.loops.last() else {
                    return Err(CompileError::LoopControlOutsideLoop {
                        keyword: if is_break { "break" } else { "continue" },
                        span: stmt.span,
                    });
                };
                let target = if is_break {
                    ctx.break_to.clone()
                } else {
                    ctx.continue_to.clone()
                };
                self.terminate(Terminator::Branch(target));
            }
            StmtKind::Yield(_) => {
                return Err(CompileError::UnsupportedStatement {
                    what: stmt.kind.describe().to_string(),
                    span: stmt.span,
                })
            }
        }
        Ok(())
    }

    fn assign(&mut self, name: &str, value: Value) {
        let dest = match self.scope.get(name) {
            Some(var @ Value::Temp { .. }) => var.clone(),
            _ => {
                let var = self.func.new_temp(value.ty().clone());
                self.scope.insert(name.to_string(), var.clone());
                var
            }
        };
        self.emit(Inst::Copy { dest, src: value });
    }

    fn lower_if(
        &mut self,
        cond: &Expr,
        then: &[Stmt],
        elifs: &[(Expr, Vec<Stmt>)],
        orelse: &[Stmt],
    ) -> CompileResult<()> {
        let id = self.fresh_id();
        let then_label = format!("if_then_{}", id);
        let merge_label = format!("if_merge_{}", id);
        let else_label = if orelse.is_empty() {
            merge_label.clone()
        } else {
            format!("if_else_{}", id)
        };
        let elif_labels: Vec<(String, String)> = elifs
            .iter()
            .map(|_| {
                let eid = self.fresh_id();
                (format!("elif_cond_{}", eid), format!("elif_then_{}", eid))
            })
            .collect();

        let first_false = elif_labels
            .first()
            .map(|(c, _)| c.clone())
            .unwrap_or_else(|| else_label.clone());

        let cond = self.lower_expr(cond)?;
        self.terminate(Terminator::CondBranch {
            cond,
            if_true: then_label.clone(),
            if_false: first_false.clone(),
        });
        let mut merge_reached = first_false == merge_label;

        self.start_block(then_label);
        self.lower_stmts(then)?;
        merge_reached |= self.jump_to(&merge_label);

        for (k, ((elif_cond, elif_body), (cond_label, then_label))) in
            elifs.iter().zip(&elif_labels).enumerate()
        {
            let next = elif_labels
                .get(k + 1)
                .map(|(c, _)| c.clone())
                .unwrap_or_else(|| else_label.clone());

            self.start_block(cond_label.clone());
            let cond = self.lower_expr(elif_cond)?;
            merge_reached |= next == merge_label;
            self.terminate(Terminator::CondBranch {
                cond,
                if_true: then_label.clone(),
                if_false: next,
            });

            self.start_block(then_label.clone());
            self.lower_stmts(elif_body)?;
            merge_reached |= self.jump_to(&merge_label);
        }

        if !orelse.is_empty() {
            self.start_block(else_label);
            self.lower_stmts(orelse)?;
            merge_reached |= self.jump_to(&merge_label);
        }

        if merge_reached {
            self.start_block(merge_label);
        }
        Ok(())
    }

    fn lower_while(&mut self, cond: &Expr, body: &[Stmt]) -> CompileResult<()> {
        let id = self.fresh_id();
        let header = format!("while_header_{}", id);
        let body_label = format!("while_body_{}", id);
        let exit = format!("while_exit_{}", id);

        self.jump_to(&header);
        self.start_block(header.clone());
        let cond = self.lower_expr(cond)?;
        self.terminate(Terminator::CondBranch {
            cond,
            if_true: body_label.clone(),
            if_false: exit.clone(),
        });

        self.loops.push(LoopContext {
            break_to: exit.clone(),
            continue_to: header.clone(),
        });
        self.start_block(body_label);
        let lowered = self.lower_stmts(body);
        self.loops.pop();
        lowered?;
        self.jump_to(&header);

        self.start_block(exit);
        Ok(())
    }

    /// `for x in range(a, b)`, `for x in range(b)` and `for x in n` count
    /// upward by one.
    fn lower_for(&mut self, target: &str, iter: &Expr, body: &[Stmt]) -> CompileResult<()> {
        let (start, bound) = match &iter.kind {
            ExprKind::Call { func, args } if func == "range" && !self.scope.contains_key("range") => {
                match args.as_slice() {
                    [bound] => (Value::int(0), self.lower_expr(bound)?),
                    [start, bound] => (self.lower_expr(start)?, self.lower_expr(bound)?),
                    _ => {
                        return Err(CompileError::UnsupportedExpression {
                            what: format!("range with {} arguments", args.len()),
                            span: iter.span,
                        })
                    }
                }
            }
            _ => (Value::int(0), self.lower_expr(iter)?),
        };

        let id = self.fresh_id();
        let header = format!("for_header_{}", id);
        let body_label = format!("for_body_{}", id);
        let step = format!("for_step_{}", id);
        let exit = format!("for_exit_{}", id);

        self.assign(target, start);
        let var = self
            .scope
            .get(target)
            .cloned()
            .ok_or_else(|| CompileError::UndefinedVariable {
                name: target.to_string(),
                span: iter.span,
            })?;
        self.jump_to(&header);

        self.start_block(header.clone());
        let cond = self.func.new_temp(Type::Bool);
        self.emit(Inst::BinOp {
            dest: cond.clone(),
            op: BinaryOp::Lt,
            lhs: var.clone(),
            rhs: bound,
        });
        self.terminate(Terminator::CondBranch {
            cond,
            if_true: body_label.clone(),
            if_false: exit.clone(),
        });

        self.loops.push(LoopContext {
            break_to: exit.clone(),
            continue_to: step.clone(),
        });
        self.start_block(body_label);
        let lowered = self.lower_stmts(body);
        self.loops.pop();
        lowered?;
        self.jump_to(&step);

        self.start_block(step);
        let next = self.func.new_temp(Type::Int);
        self.emit(Inst::BinOp {
            dest: next.clone(),
            op: BinaryOp::Add,
            lhs: var,
            rhs: Value::int(1),
        });
        self.assign(target, next);
        self.jump_to(&header);

        self.start_block(exit);
        Ok(())
    }

    /// Cases are tested in order through a chain of conditional branches.
    /// Each arm gets `match_case_N_i`, preceded by `match_guard_N_i` when it
    /// has a guard; later arms are tested in `match_test_N_i`. Captures are
    /// bound once the pattern has matched, before the guard runs.
    fn lower_match(&mut self, subject: &Expr, cases: &[MatchCase]) -> CompileResult<()> {
        let value = self.lower_expr(subject)?;
        let pinned = self.func.new_temp(value.ty().clone());
        self.emit(Inst::Copy {
            dest: pinned.clone(),
            src: value,
        });

        let id = self.fresh_id();
        let exit = format!("match_exit_{}", id);
        let mut exit_reached = false;

        for (i, case) in cases.iter().enumerate() {
            if i > 0 {
                self.start_block(format!("match_test_{}_{}", id, i));
            }
            let next = if i + 1 < cases.len() {
                format!("match_test_{}_{}", id, i + 1)
            } else {
                exit.clone()
            };
            let body_label = format!("match_case_{}_{}", id, i);
            let guard_label = format!("match_guard_{}_{}", id, i);
            let on_match = if case.guard.is_some() {
                guard_label.clone()
            } else {
                body_label.clone()
            };

            let test = self.lower_pattern(&case.pattern, &pinned, case.span)?;
            let refutable = test.is_some() || case.guard.is_some();
            match test {
                Some(cond) => self.terminate(Terminator::CondBranch {
                    cond,
                    if_true: on_match,
                    if_false: next.clone(),
                }),
                None => {
                    self.jump_to(&on_match);
                }
            }

            if let Some(guard) = &case.guard {
                self.start_block(guard_label);
                self.bind_captures(&case.pattern, &pinned);
                let cond = self.lower_expr(guard)?;
                self.terminate(Terminator::CondBranch {
                    cond,
                    if_true: body_label.clone(),
                    if_false: next.clone(),
                });
                self.start_block(body_label);
            } else {
                self.start_block(body_label);
                self.bind_captures(&case.pattern, &pinned);
            }
            self.lower_stmts(&case.body)?;
            exit_reached |= self.jump_to(&exit);

            if refutable {
                exit_reached |= next == exit;
            } else {
                if i + 1 < cases.len() {
                    log::debug!(
                        "{}: {} case(s) after an irrefutable pattern at {} are unreachable",
                        self.func.name,
                        cases.len() - i - 1,
                        case.span
                    );
                }
                break;
            }
        }

        if exit_reached {
            self.start_block(exit);
        }
        Ok(())
    }

    /// Condition under which `pattern` matches `subject`; `None` when it
    /// always matches.
    fn lower_pattern(&mut self, pattern: &Pattern, subject: &Value, span: Span) -> CompileResult<Option<Value>> {
        match pattern {
            Pattern::Wildcard | Pattern::Capture(_) => Ok(None),
            Pattern::Literal(literal) => {
                let literal = self.lower_expr(literal)?;
                Ok(Some(self.binop(BinaryOp::Eq, subject.clone(), literal, Type::Bool)))
            }
            Pattern::Or(alts) => {
                if alts.iter().any(|alt| !alt.captures().is_empty()) {
                    return Err(CompileError::UnsupportedStatement {
                        what: "capture inside an or-pattern".to_string(),
                        span,
                    });
                }
                let mut tests = Vec::with_capacity(alts.len());
                for alt in alts {
                    match self.lower_pattern(alt, subject, span)? {
                        Some(test) => tests.push(test),
                        None => return Ok(None),
                    }
                }
                let mut tests = tests.into_iter();
                let first = tests.next();
                Ok(first.map(|first| {
                    tests.fold(first, |acc, test| self.binop(BinaryOp::Or, acc, test, Type::Bool))
                }))
            }
            Pattern::Class { name, args } => {
                if !self.ctx.classes.contains(name) {
                    return Err(CompileError::UndefinedVariable {
                        name: name.clone(),
                        span,
                    });
                }
                if !args.is_empty() {
                    return Err(CompileError::UnsupportedStatement {
                        what: "class pattern with sub-patterns".to_string(),
                        span,
                    });
                }
                // Types are static, so the outcome is known here.
                if subject.ty().class_name() == Some(name.as_str()) {
                    Ok(None)
                } else {
                    Ok(Some(Value::bool(false)))
                }
            }
        }
    }

    fn bind_captures(&mut self, pattern: &Pattern, subject: &Value) {
        for name in pattern.captures() {
            self.assign(name, subject.clone());
        }
    }

    // ---- expressions ----

    fn lower_expr(&mut self, expr: &Expr) -> CompileResult<Value> {
        match &expr.kind {
            ExprKind::Int(v) => Ok(Value::int(*v)),
            ExprKind::Bool(b) => Ok(Value::bool(*b)),
            ExprKind::NoneLit => Ok(Value::Const {
                val: 0,
                ty: Type::None,
            }),
            ExprKind::Str(_) | ExprKind::List(_) => Err(CompileError::UnsupportedExpression {
                what: expr.kind.describe().to_string(),
                span: expr.span,
            }),
            ExprKind::Name(name) => self.lower_name(name, expr.span),
            ExprKind::Arith { op, lhs, rhs } => {
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                let op = arith_op(*op);
                let bitwise = matches!(op, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor);
                let ty = if bitwise && *lhs.ty() == Type::Bool && *rhs.ty() == Type::Bool {
                    Type::Bool
                } else {
                    Type::Int
                };
                Ok(self.binop(op, lhs, rhs, ty))
            }
            ExprKind::Compare { op, lhs, rhs } => {
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                Ok(self.binop(compare_op(*op), lhs, rhs, Type::Bool))
            }
            ExprKind::Not(inner) => {
                let value = self.lower_expr(inner)?;
                Ok(self.binop(BinaryOp::Xor, value, Value::bool(true), Type::Bool))
            }
            ExprKind::Neg(inner) => {
                let value = self.lower_expr(inner)?;
                Ok(self.binop(BinaryOp::Sub, Value::int(0), value, Type::Int))
            }
            ExprKind::Logic { op, lhs, rhs } => self.lower_short_circuit(*op, lhs, rhs),
            ExprKind::Call { func, args } => self.lower_call(func, args),
            ExprKind::MethodCall {
                object,
                method,
                args,
            } => {
                let receiver = self.lower_expr(object)?;
                let args = self.lower_args(args)?;
                let ty = receiver
                    .ty()
                    .class_name()
                    .and_then(|class| self.ctx.classes.resolve_method(class, method))
                    .and_then(|symbol| self.ctx.signatures.get(&symbol).cloned())
                    .unwrap_or(Type::Int);
                let dest = self.func.new_temp(ty);
                self.emit(Inst::MethodCall {
                    dest: dest.clone(),
                    receiver,
                    method: method.clone(),
                    args,
                });
                Ok(dest)
            }
            ExprKind::Attribute { object, attr } => {
                let object = self.lower_expr(object)?;
                let ty = object
                    .ty()
                    .class_name()
                    .and_then(|class| self.ctx.classes.attr_type(class, attr))
                    .unwrap_or(Type::Int);
                let dest = self.func.new_temp(ty);
                self.emit(Inst::GetAttr {
                    dest: dest.clone(),
                    object,
                    attr: attr.clone(),
                });
                Ok(dest)
            }
            ExprKind::Subscript { container, index } => {
                let container = self.lower_expr(container)?;
                let index = self.lower_expr(index)?;
                let dest = self.func.new_temp(Type::Int);
                self.emit(Inst::GetItem {
                    dest: dest.clone(),
                    container,
                    index,
                });
                Ok(dest)
            }
        }
    }

    fn lower_name(&mut self, name: &str, span: Span) -> CompileResult<Value> {
        if let Some(value) = self.scope.get(name) {
            return Ok(value.clone());
        }
        // A bare function name is a closure with no captures.
        if self.ctx.signatures.contains_key(name) {
            let dest = self.func.new_temp(Type::Closure);
            self.emit(Inst::MakeClosure {
                dest: dest.clone(),
                func: name.to_string(),
                captures: Vec::new(),
            });
            return Ok(dest);
        }
        Err(CompileError::UndefinedVariable {
            name: name.to_string(),
            span,
        })
    }

    fn binop(&mut self, op: BinaryOp, lhs: Value, rhs: Value, ty: Type) -> Value {
        let dest = self.func.new_temp(ty);
        self.emit(Inst::BinOp {
            dest: dest.clone(),
            op,
            lhs,
            rhs,
        });
        dest
    }

    fn lower_args(&mut self, args: &[Expr]) -> CompileResult<Vec<Value>> {
        args.iter().map(|arg| self.lower_expr(arg)).collect()
    }

    /// `a and b` evaluates `b` only when `a` is true; `a or b` only when `a`
    /// is false. The merge block selects the result with a phi.
    fn lower_short_circuit(&mut self, op: BoolOp, lhs: &Expr, rhs: &Expr) -> CompileResult<Value> {
        let left = self.lower_expr(lhs)?;
        let left_end = self.current_label()?;

        let id = self.fresh_id();
        let prefix = match op {
            BoolOp::And => "and",
            BoolOp::Or => "or",
        };
        let right_label = format!("{}_right_{}", prefix, id);
        let merge_label = format!("{}_merge_{}", prefix, id);

        let (if_true, if_false) = match op {
            BoolOp::And => (right_label.clone(), merge_label.clone()),
            BoolOp::Or => (merge_label.clone(), right_label.clone()),
        };
        self.terminate(Terminator::CondBranch {
            cond: left.clone(),
            if_true,
            if_false,
        });

        self.start_block(right_label);
        let right = self.lower_expr(rhs)?;
        let right_end = self.current_label()?;
        self.jump_to(&merge_label);

        self.start_block(merge_label);
        let ty = if left.ty() == right.ty() {
            left.ty().clone()
        } else {
            Type::Int
        };
        let dest = self.func.new_temp(ty);
        let mut phi = Phi::new(dest.clone());
        phi.incoming.push((left_end, left));
        phi.incoming.push((right_end, right));
        self.open()?.phis.push(phi);
        Ok(dest)
    }

    fn lower_call(&mut self, func: &str, args: &[Expr]) -> CompileResult<Value> {
        if let Some(closure) = self.scope.get(func).cloned() {
            let args = self.lower_args(args)?;
            let dest = self.func.new_temp(Type::Int);
            self.emit(Inst::ClosureCall {
                dest: dest.clone(),
                closure,
                args,
            });
            return Ok(dest);
        }

        if self.ctx.classes.contains(func) {
            let args = self.lower_args(args)?;
            let object = self.func.new_temp(Type::Class(func.to_string()));
            self.emit(Inst::AllocObject {
                dest: object.clone(),
                class: func.to_string(),
            });
            if self.ctx.classes.resolve_method(func, CONSTRUCTOR).is_some() {
                let dest = self.func.new_temp(Type::None);
                self.emit(Inst::MethodCall {
                    dest,
                    receiver: object.clone(),
                    method: CONSTRUCTOR.to_string(),
                    args,
                });
            }
            return Ok(object);
        }

        let args = self.lower_args(args)?;
        let ty = self.ctx.signatures.get(func).cloned().unwrap_or(Type::Int);
        let dest = self.func.new_temp(ty);
        self.emit(Inst::Call {
            dest: dest.clone(),
            func: func.to_string(),
            args,
        });
        Ok(dest)
    }
}

fn arith_op(op: ArithOp) -> BinaryOp {
    match op {
        ArithOp::Add => BinaryOp::Add,
        ArithOp::Sub => BinaryOp::Sub,
        ArithOp::Mul => BinaryOp::Mul,
        ArithOp::Div => BinaryOp::Div,
        ArithOp::BitAnd => BinaryOp::And,
        ArithOp::BitOr => BinaryOp::Or,
        ArithOp::BitXor => BinaryOp::Xor,
    }
}

fn compare_op(op: CompareOp) -> BinaryOp {
    match op {
        CompareOp::Eq => BinaryOp::Eq,
        CompareOp::Ne => BinaryOp::Ne,
        CompareOp::Lt => BinaryOp::Lt,
        CompareOp::Le => BinaryOp::Le,
        CompareOp::Gt => BinaryOp::Gt,
        CompareOp::Ge => BinaryOp::Ge,
    }
}

/// Every name bound by assignment or a `for` target anywhere in `stmts`.
fn collect_assigned(stmts: &[Stmt], out: &mut HashSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Assign {
                target: Target::Name(name),
                ..
            } => {
                out.insert(name.clone());
            }
            StmtKind::If {
                then,
                elifs,
                orelse,
                ..
            } => {
                collect_assigned(then, out);
                for (_, body) in elifs {
                    collect_assigned(body, out);
                }
                collect_assigned(orelse, out);
            }
            StmtKind::While { body, .. } => collect_assigned(body, out),
            StmtKind::For { target, body, .. } => {
                out.insert(target.clone());
                collect_assigned(body, out);
            }
            StmtKind::Match { cases, .. } => {
                for case in cases {
                    out.extend(case.pattern.captures().into_iter().map(str::to_string));
                    collect_assigned(&case.body, out);
                }
            }
            _ => {}
        }
    }
}
