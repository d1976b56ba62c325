//! Target-independent lowering of one allocated function.
//!
//! Values are read at the position of the instruction that uses them and
//! written at the position that defines them; the allocation decides whether
//! that is a register or a spill slot. Locations only change at call sites
//! (split moves) and on CFG edges (phi moves plus the live-in values whose
//! segment differs on both sides of the edge).

use hashbrown::HashMap;

use crate::core::{AsmReg, CompilationSession, CompileError, CompileResult};
use crate::ir::{BinaryOp, ClassTable, Function, Inst, Terminator, Value, ValueKey};
use crate::regalloc::{Allocation, Liveness, Location, Numbering};

use super::frame::Frame;
use super::moves::{sequentialize, Move, MoveSrc, Step};
use super::{
    Asm, Backend, Operand, CLOSURE_CAPTURES_OFFSET, CLOSURE_CODE_OFFSET, RUNTIME_ALLOC,
    RUNTIME_GETITEM, RUNTIME_SETITEM,
};

enum Callee {
    Symbol(String),
    Closure,
}

/// Moves of a conditional edge, emitted out of line after the body.
struct EdgeStub {
    label: String,
    steps: Vec<Step>,
    target: String,
}

/// Emits one function for the target behind `B`.
pub struct FunctionEmitter<'a, 's, B: Backend> {
    backend: &'a B,
    func: &'a Function,
    alloc: &'a Allocation,
    classes: &'a ClassTable,
    session: &'a CompilationSession<'s>,
    numbering: Numbering,
    liveness: Liveness,
    frame: Frame<'s>,
    asm: Asm,
    /// Frame cell of every `Alloc`, keyed by (block, instruction).
    cells: HashMap<(usize, usize), u32>,
    stubs: Vec<EdgeStub>,
}

impl<'a, 's, B: Backend> FunctionEmitter<'a, 's, B> {
    pub fn new(
        backend: &'a B,
        func: &'a Function,
        alloc: &'a Allocation,
        classes: &'a ClassTable,
        session: &'a CompilationSession<'s>,
    ) -> Self {
        let frame = Frame::layout(
            session.arena(),
            func,
            alloc.used_callee_saved,
            alloc.spill_count,
            backend.arg_regs().len(),
        );

        let mut cells = HashMap::new();
        for (b, block) in func.blocks.iter().enumerate() {
            for (i, inst) in block.insts.iter().enumerate() {
                if matches!(inst, Inst::Alloc { .. }) {
                    let next = cells.len() as u32;
                    cells.insert((b, i), next);
                }
            }
        }

        Self {
            backend,
            func,
            alloc,
            classes,
            session,
            numbering: Numbering::compute(func),
            liveness: Liveness::compute(func),
            frame,
            asm: Asm::new(),
            cells,
            stubs: Vec::new(),
        }
    }

    pub fn emit(mut self) -> CompileResult<String> {
        let func = self.func;
        let symbol = self.backend.symbol(&func.name);
        self.backend.function_header(&mut self.asm, &symbol);
        self.backend.prologue(&mut self.asm, &self.frame);
        self.move_params();

        for (b, block) in func.blocks.iter().enumerate() {
            self.asm.label(&self.block_label(&block.label));
            for (i, inst) in block.insts.iter().enumerate() {
                self.emit_inst(b, i, inst)?;
                self.session.record_instruction_compiled(inst.kind());
            }
            self.emit_terminator(b)?;
        }

        for stub in std::mem::take(&mut self.stubs) {
            self.asm.label(&stub.label);
            self.emit_edge_steps(&stub.steps);
            let target = self.block_label(&stub.target);
            self.backend.jump(&mut self.asm, &target);
        }

        log::debug!(
            "Emitted {} for {}: {} lines, {} byte frame, {} saved registers",
            func.name,
            self.backend.arch(),
            self.asm.line_count(),
            self.frame.size(),
            self.frame.saved_registers.len()
        );
        self.session
            .record_function_compiled(&func.name, self.asm.line_count());
        Ok(self.asm.finish())
    }

    fn block_label(&self, block: &str) -> String {
        format!(".L{}.{}", self.func.name, block)
    }

    fn location(&self, key: ValueKey, pos: u32) -> CompileResult<Location> {
        self.alloc
            .location_at(key, pos)
            .ok_or_else(|| CompileError::CodeGeneration {
                reason: format!("{} has no location at position {}", key, pos),
            })
    }

    fn value_key(value: &Value) -> CompileResult<ValueKey> {
        value.key().ok_or_else(|| CompileError::CodeGeneration {
            reason: format!("constant {} used as a destination", value),
        })
    }

    fn source(&self, value: &Value, pos: u32) -> CompileResult<MoveSrc> {
        match value {
            Value::Const { val, .. } => Ok(MoveSrc::Imm(*val)),
            _ => Ok(MoveSrc::Loc(self.location(Self::value_key(value)?, pos)?)),
        }
    }

    /// Register holding `value` at `pos`, loading it into `fallback` when it
    /// is a constant or spilled.
    fn read(&mut self, value: &Value, pos: u32, fallback: AsmReg) -> CompileResult<AsmReg> {
        match self.source(value, pos)? {
            MoveSrc::Imm(v) => {
                self.backend.load_imm(&mut self.asm, fallback, v);
                Ok(fallback)
            }
            MoveSrc::Loc(Location::Reg(reg)) => Ok(reg),
            MoveSrc::Loc(Location::Spill(slot)) => {
                let word = self.frame.spill_word(slot);
                self.backend.load_word(&mut self.asm, &self.frame, fallback, word);
                Ok(fallback)
            }
            MoveSrc::Scratch => Ok(self.backend.cycle_reg()),
        }
    }

    fn read_into(&mut self, value: &Value, pos: u32, reg: AsmReg) -> CompileResult<()> {
        let found = self.read(value, pos, reg)?;
        if found != reg {
            self.backend.mov(&mut self.asm, reg, found);
        }
        Ok(())
    }

    /// Register to compute `dest` into, plus the spill word to store it to
    /// afterwards when `dest` lives on the stack.
    fn def_reg(&self, dest: &Value, pos: u32) -> CompileResult<(AsmReg, Option<u32>)> {
        match self.location(Self::value_key(dest)?, pos)? {
            Location::Reg(reg) => Ok((reg, None)),
            Location::Spill(slot) => Ok((self.backend.temp_reg(), Some(self.frame.spill_word(slot)))),
        }
    }

    fn finish_def(&mut self, reg: AsmReg, spill: Option<u32>) {
        if let Some(word) = spill {
            self.backend.store_word(&mut self.asm, &self.frame, word, reg);
        }
    }

    fn define_from(&mut self, dest: &Value, pos: u32, src: AsmReg) -> CompileResult<()> {
        let dst = self.location(Self::value_key(dest)?, pos)?;
        self.emit_step(Step::Move(Move::new(MoveSrc::Loc(Location::Reg(src)), dst)));
        Ok(())
    }

    fn load_location(&mut self, dst: AsmReg, loc: Location) {
        match loc {
            Location::Reg(reg) => {
                if reg != dst {
                    self.backend.mov(&mut self.asm, dst, reg);
                }
            }
            Location::Spill(slot) => {
                let word = self.frame.spill_word(slot);
                self.backend.load_word(&mut self.asm, &self.frame, dst, word);
            }
        }
    }

    fn emit_step(&mut self, step: Step) {
        let cycle = self.backend.cycle_reg();
        let temp = self.backend.temp_reg();
        match step {
            Step::ToScratch(loc) => self.load_location(cycle, loc),
            Step::Move(Move {
                src,
                dst: Location::Reg(dst),
            }) => match src {
                MoveSrc::Imm(v) => self.backend.load_imm(&mut self.asm, dst, v),
                MoveSrc::Scratch => self.backend.mov(&mut self.asm, dst, cycle),
                MoveSrc::Loc(loc) => self.load_location(dst, loc),
            },
            Step::Move(Move {
                src,
                dst: Location::Spill(slot),
            }) => {
                let reg = match src {
                    MoveSrc::Imm(v) => {
                        self.backend.load_imm(&mut self.asm, temp, v);
                        temp
                    }
                    MoveSrc::Scratch => cycle,
                    MoveSrc::Loc(Location::Reg(reg)) => reg,
                    MoveSrc::Loc(loc @ Location::Spill(_)) => {
                        self.load_location(temp, loc);
                        temp
                    }
                };
                let word = self.frame.spill_word(slot);
                self.backend.store_word(&mut self.asm, &self.frame, word, reg);
            }
        }
    }

    /// Emit a sequentialized move set; returns the number of moves.
    fn emit_steps(&mut self, steps: &[Step]) -> usize {
        for &step in steps {
            self.emit_step(step);
        }
        steps.iter().filter(|s| matches!(s, Step::Move(_))).count()
    }

    fn emit_edge_steps(&mut self, steps: &[Step]) {
        let moves = self.emit_steps(steps);
        if moves > 0 {
            self.session.record_phi_moves(moves);
        }
    }

    /// Move incoming arguments from the ABI locations into their allocated
    /// homes. Argument registers are never allocated, so the moves cannot
    /// conflict.
    fn move_params(&mut self) {
        let args = self.backend.arg_regs();
        let temp = self.backend.temp_reg();
        for index in 0..self.func.params.len() {
            let Some(home) = self.alloc.def_location(ValueKey::Param(index as u32)) else {
                continue;
            };
            match args.get(index) {
                Some(&reg) => {
                    self.emit_step(Step::Move(Move::new(MoveSrc::Loc(Location::Reg(reg)), home)))
                }
                None => {
                    let stack_index = (index - args.len()) as u32;
                    match home {
                        Location::Reg(reg) => {
                            self.backend.load_incoming_arg(&mut self.asm, reg, stack_index)
                        }
                        Location::Spill(slot) => {
                            self.backend.load_incoming_arg(&mut self.asm, temp, stack_index);
                            let word = self.frame.spill_word(slot);
                            self.backend.store_word(&mut self.asm, &self.frame, word, temp);
                        }
                    }
                }
            }
        }
    }

    fn emit_inst(&mut self, b: usize, i: usize, inst: &Inst) -> CompileResult<()> {
        let pos = self.numbering.insts[b][i];
        let temp = self.backend.temp_reg();
        let rhs = self.backend.rhs_reg();
        match inst {
            Inst::BinOp { dest, op, lhs, rhs: right } => self.emit_binop(dest, *op, lhs, right, pos),
            Inst::Copy { dest, src } => {
                let src = self.source(src, pos)?;
                let dst = self.location(Self::value_key(dest)?, pos)?;
                self.emit_step(Step::Move(Move::new(src, dst)));
                Ok(())
            }
            Inst::Alloc { dest } => {
                let cell = self.cells.get(&(b, i)).copied().unwrap_or_default();
                let word = self.frame.cell_word(cell);
                let (reg, spill) = self.def_reg(dest, pos)?;
                self.backend.word_address(&mut self.asm, &self.frame, reg, word);
                self.finish_def(reg, spill);
                Ok(())
            }
            Inst::Load { dest, addr } => {
                let base = self.read(addr, pos, temp)?;
                let (reg, spill) = self.def_reg(dest, pos)?;
                self.backend.load_mem(&mut self.asm, reg, base, 0);
                self.finish_def(reg, spill);
                Ok(())
            }
            Inst::Store { addr, src } => {
                let base = self.read(addr, pos, temp)?;
                let value = self.read(src, pos, rhs)?;
                self.backend.store_mem(&mut self.asm, base, 0, value);
                Ok(())
            }
            Inst::Call { dest, func, args } => {
                let symbol = self.backend.symbol(func);
                self.emit_call(Callee::Symbol(symbol), args, pos, Some(dest))
            }
            Inst::MethodCall {
                dest,
                receiver,
                method,
                args,
            } => {
                let target = self.resolve_method(receiver, method)?;
                let symbol = self.backend.symbol(&target);
                let all: Vec<Value> = std::iter::once(receiver).chain(args).cloned().collect();
                self.emit_call(Callee::Symbol(symbol), &all, pos, Some(dest))
            }
            Inst::ClosureCall {
                dest,
                closure,
                args,
            } => {
                let all: Vec<Value> = std::iter::once(closure).chain(args).cloned().collect();
                self.emit_call(Callee::Closure, &all, pos, Some(dest))
            }
            Inst::AllocObject { dest, class } => {
                let size = self.classes.object_size(class);
                let symbol = self.backend.symbol(RUNTIME_ALLOC);
                self.emit_call(Callee::Symbol(symbol), &[Value::int(size)], pos, Some(dest))
            }
            Inst::GetAttr { dest, object, attr } => {
                let offset = self.attr_offset(object, attr)?;
                let base = self.read(object, pos, temp)?;
                let (reg, spill) = self.def_reg(dest, pos)?;
                self.backend.load_mem(&mut self.asm, reg, base, offset);
                self.finish_def(reg, spill);
                Ok(())
            }
            Inst::SetAttr {
                object,
                attr,
                value,
            } => {
                let offset = self.attr_offset(object, attr)?;
                let base = self.read(object, pos, temp)?;
                let value = self.read(value, pos, rhs)?;
                self.backend.store_mem(&mut self.asm, base, offset, value);
                Ok(())
            }
            Inst::GetItem {
                dest,
                container,
                index,
            } => {
                let symbol = self.backend.symbol(RUNTIME_GETITEM);
                let args = [container.clone(), index.clone()];
                self.emit_call(Callee::Symbol(symbol), &args, pos, Some(dest))
            }
            Inst::SetItem {
                container,
                index,
                value,
            } => {
                let symbol = self.backend.symbol(RUNTIME_SETITEM);
                let args = [container.clone(), index.clone(), value.clone()];
                self.emit_call(Callee::Symbol(symbol), &args, pos, None)
            }
            Inst::MakeClosure {
                dest,
                func,
                captures,
            } => self.emit_make_closure(dest, func, captures, pos),
        }
    }

    fn emit_binop(
        &mut self,
        dest: &Value,
        op: BinaryOp,
        lhs: &Value,
        rhs: &Value,
        pos: u32,
    ) -> CompileResult<()> {
        let temp = self.backend.temp_reg();
        let rhs_reg = self.backend.rhs_reg();
        let left = self.read(lhs, pos, temp)?;
        let right = match rhs.as_const() {
            Some(v) if self.backend.alu_imm_fits(op, v) => Operand::Imm(v),
            _ => Operand::Reg(self.read(rhs, pos, rhs_reg)?),
        };
        let (reg, spill) = self.def_reg(dest, pos)?;
        self.backend.binop(&mut self.asm, op, reg, left, right);
        self.finish_def(reg, spill);
        Ok(())
    }

    fn attr_offset(&self, object: &Value, attr: &str) -> CompileResult<i32> {
        let class = object
            .ty()
            .class_name()
            .ok_or_else(|| CompileError::CodeGeneration {
                reason: format!("attribute '{}' read from non-object value {}", attr, object),
            })?;
        self.classes
            .attr_offset(class, attr)
            .ok_or_else(|| CompileError::CodeGeneration {
                reason: format!("class {} has no attribute '{}'", class, attr),
            })
    }

    fn resolve_method(&self, receiver: &Value, method: &str) -> CompileResult<String> {
        let class = receiver
            .ty()
            .class_name()
            .ok_or_else(|| CompileError::CodeGeneration {
                reason: format!(
                    "dynamic dispatch of '{}' on {} ({}) is not supported",
                    method,
                    receiver,
                    receiver.ty()
                ),
            })?;
        self.classes
            .resolve_method(class, method)
            .ok_or_else(|| CompileError::CodeGeneration {
                reason: format!("class {} has no method '{}'", class, method),
            })
    }

    fn emit_split_moves(&mut self, pos: u32) {
        let moves: Vec<Move> = self
            .alloc
            .split_moves_at(pos)
            .into_iter()
            .map(|(from, to)| Move::new(MoveSrc::Loc(from), to))
            .collect();
        if !moves.is_empty() {
            let steps = sequentialize(&moves);
            self.emit_steps(&steps);
        }
    }

    fn emit_call(
        &mut self,
        callee: Callee,
        args: &[Value],
        pos: u32,
        dest: Option<&Value>,
    ) -> CompileResult<()> {
        self.emit_split_moves(pos);

        let regs = self.backend.arg_regs();
        let temp = self.backend.temp_reg();
        for (k, arg) in args.iter().enumerate().skip(regs.len()) {
            let reg = self.read(arg, pos, temp)?;
            self.backend
                .store_outgoing_arg(&mut self.asm, (k - regs.len()) as u32, reg);
        }
        for (arg, &reg) in args.iter().zip(regs) {
            self.read_into(arg, pos, reg)?;
        }

        match &callee {
            Callee::Symbol(symbol) => {
                self.backend.call(&mut self.asm, symbol);
                self.session.record_call_site(symbol);
            }
            Callee::Closure => {
                self.backend.call_closure(&mut self.asm);
                self.session.record_call_site("<closure>");
            }
        }

        if let Some(dest) = dest {
            let ret = self.backend.ret_reg();
            self.define_from(dest, pos, ret)?;
        }
        Ok(())
    }

    /// Allocate the closure object, then fill in the captures and the code
    /// pointer while the object is still in the return register.
    fn emit_make_closure(
        &mut self,
        dest: &Value,
        func: &str,
        captures: &[Value],
        pos: u32,
    ) -> CompileResult<()> {
        let size = CLOSURE_CAPTURES_OFFSET as i64 + 8 * captures.len() as i64;
        let alloc = self.backend.symbol(RUNTIME_ALLOC);
        self.emit_call(Callee::Symbol(alloc), &[Value::int(size)], pos, None)?;

        let object = self.backend.ret_reg();
        let rhs = self.backend.rhs_reg();
        for (i, capture) in captures.iter().enumerate() {
            let reg = self.read(capture, pos + 1, rhs)?;
            let offset = CLOSURE_CAPTURES_OFFSET + 8 * i as i32;
            self.backend.store_mem(&mut self.asm, object, offset, reg);
        }
        let code = self.backend.symbol(func);
        self.backend.symbol_address(&mut self.asm, rhs, &code);
        self.backend
            .store_mem(&mut self.asm, object, CLOSURE_CODE_OFFSET, rhs);
        self.define_from(dest, pos, object)
    }

    /// Label a conditional edge jumps to: the block itself, or a stub that
    /// performs the edge's moves first.
    fn edge_target(&mut self, from: &str, to: &str, steps: Vec<Step>) -> String {
        if steps.is_empty() {
            return self.block_label(to);
        }
        let label = format!(".L{}.{}_to_{}", self.func.name, from, to);
        self.stubs.push(EdgeStub {
            label: label.clone(),
            steps,
            target: to.to_string(),
        });
        label
    }

    /// Sequentialized moves for the edge from block `b` to `target`.
    fn edge_moves(&self, b: usize, target: &str) -> CompileResult<Vec<Step>> {
        let func = self.func;
        let s = func
            .block_index(target)
            .ok_or_else(|| CompileError::BlockLayout {
                reason: format!("{}: branch to unknown block {}", func.name, target),
            })?;
        let from = func.blocks[b].label.as_str();
        let term = self.numbering.terms[b];

        let mut moves = Vec::new();
        for (phi, &phi_pos) in func.blocks[s].phis.iter().zip(&self.numbering.phis[s]) {
            let dest = Self::value_key(&phi.dest)?;
            let value = phi
                .incoming_from(from)
                .ok_or_else(|| CompileError::CodeGeneration {
                    reason: format!("phi {} in {} has no value from {}", phi.dest, target, from),
                })?;
            moves.push(Move::new(self.source(value, term)?, self.location(dest, phi_pos)?));
        }

        let mut live: Vec<ValueKey> = self.liveness.live_in[s].iter().copied().collect();
        live.sort_unstable();
        let entry = self.numbering.block_start(s);
        for key in live {
            let here = self.alloc.location_at(key, term);
            let there = self.alloc.location_entering(key, entry);
            if let (Some(here), Some(there)) = (here, there) {
                if here != there {
                    moves.push(Move::new(MoveSrc::Loc(here), there));
                }
            }
        }
        Ok(sequentialize(&moves))
    }

    fn emit_terminator(&mut self, b: usize) -> CompileResult<()> {
        let func = self.func;
        let block = &func.blocks[b];
        let pos = self.numbering.terms[b];
        let next = func.blocks.get(b + 1).map(|n| n.label.as_str());

        match &block.term {
            Terminator::Return(value) => {
                if let Some(value) = value {
                    let ret = self.backend.ret_reg();
                    self.read_into(value, pos, ret)?;
                }
                self.backend.epilogue(&mut self.asm, &self.frame);
            }
            Terminator::Branch(target) => {
                let steps = self.edge_moves(b, target)?;
                self.emit_edge_steps(&steps);
                if next != Some(target.as_str()) {
                    let label = self.block_label(target);
                    self.backend.jump(&mut self.asm, &label);
                }
            }
            Terminator::CondBranch {
                cond,
                if_true,
                if_false,
            } => {
                let temp = self.backend.temp_reg();
                let cond = self.read(cond, pos, temp)?;
                let on_true = self.edge_moves(b, if_true)?;
                let on_false = self.edge_moves(b, if_false)?;

                if on_true.is_empty() && next == Some(if_true.as_str()) {
                    let target = self.edge_target(&block.label, if_false, on_false);
                    self.backend.branch_zero(&mut self.asm, cond, &target);
                } else {
                    let target = self.edge_target(&block.label, if_true, on_true);
                    self.backend.branch_nonzero(&mut self.asm, cond, &target);
                    self.emit_edge_steps(&on_false);
                    if next != Some(if_false.as_str()) {
                        let label = self.block_label(if_false);
                        self.backend.jump(&mut self.asm, &label);
                    }
                }
            }
        }
        Ok(())
    }
}
