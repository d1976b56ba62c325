// Code generation turns one allocated SSA function into assembly text for a
// single target. The FunctionEmitter owns the target-independent walk: it lays
// out the frame, moves incoming parameters into their allocated homes, lowers
// every instruction through the Backend primitives, resolves phi and
// split-point moves with the parallel-move sequencer, and places edge moves
// either before a jump or in a stub emitted after the body. Each architecture
// module supplies its ABI tables, its instruction selection behind the
// Backend trait, and a validator that re-reads the emitted text and checks
// syntax, register names, addressing, immediate ranges, stack balance and
// callee-saved register discipline.

//! Assembly emission for amd64, arm64 and riscv64.

use std::fmt::{self, Write};

use crate::core::{Arch, AsmReg, CompilationSession, CompileError, CompileResult};
use crate::ir::{BinaryOp, ClassTable, Function};
use crate::regalloc::{Allocation, RegConfig};

/// Append one formatted instruction line to an [`Asm`] buffer.
macro_rules! emit {
    ($asm:expr, $($arg:tt)*) => {
        $asm.inst(format_args!($($arg)*))
    };
}

pub mod amd64;
pub mod arm64;
pub mod frame;
pub mod function;
pub mod moves;
pub mod riscv64;
pub mod validate;

pub use frame::Frame;
pub use function::FunctionEmitter;
pub use moves::{sequentialize, Move, MoveSrc, Step};
pub use validate::{validate, AsmValidator, ValidationIssue, ValidationRule};

/// Runtime entry points reached through the call ABI.
pub const RUNTIME_ALLOC: &str = "typthon_alloc";
pub const RUNTIME_GETITEM: &str = "typthon_list_getitem";
pub const RUNTIME_SETITEM: &str = "typthon_list_setitem";

/// Byte offset of the code pointer inside a closure object.
pub const CLOSURE_CODE_OFFSET: i32 = 16;
/// Byte offset of the first capture inside a closure object.
pub const CLOSURE_CAPTURES_OFFSET: i32 = 24;

/// Assembly text under construction.
#[derive(Debug, Default, Clone)]
pub struct Asm {
    text: String,
    lines: usize,
    function: String,
    next_label: u32,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a function; local labels made by [`Asm::fresh_label`] are
    /// scoped to it.
    pub fn begin_function(&mut self, symbol: &str) {
        self.function = symbol.to_string();
        self.next_label = 0;
    }

    /// A new local label for control flow inside one instruction sequence.
    pub fn fresh_label(&mut self, hint: &str) -> String {
        let label = format!(".L{}.{}{}", self.function, hint, self.next_label);
        self.next_label += 1;
        label
    }

    /// Indented instruction line.
    pub fn inst(&mut self, args: fmt::Arguments<'_>) {
        // Writing into a String cannot fail.
        let _ = writeln!(self.text, "    {}", args);
        self.lines += 1;
    }

    pub fn directive(&mut self, text: &str) {
        let _ = writeln!(self.text, "    {}", text);
        self.lines += 1;
    }

    pub fn label(&mut self, name: &str) {
        let _ = writeln!(self.text, "{}:", name);
        self.lines += 1;
    }

    pub fn line_count(&self) -> usize {
        self.lines
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn finish(self) -> String {
        self.text
    }
}

/// Second operand of an ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(AsmReg),
    Imm(i64),
}

/// Instruction selection primitives for one architecture. The function
/// emitter only ever talks to a target through these.
pub trait Backend {
    fn arch(&self) -> Arch;

    fn reg_config(&self) -> RegConfig;

    /// Integer argument registers in order.
    fn arg_regs(&self) -> &'static [AsmReg];

    fn ret_reg(&self) -> AsmReg;

    /// Scratch for left operands, results and memory-to-memory moves.
    fn temp_reg(&self) -> AsmReg;

    /// Scratch for right operands and stored values.
    fn rhs_reg(&self) -> AsmReg;

    /// Scratch holding the value that breaks a move cycle.
    fn cycle_reg(&self) -> AsmReg;

    fn reg_name(&self, reg: AsmReg) -> &'static str;

    /// Global symbol for a function or runtime entry point.
    fn symbol(&self, name: &str) -> String;

    /// `.p2align` power for function entry points.
    fn function_alignment(&self) -> u32;

    fn function_header(&self, asm: &mut Asm, symbol: &str) {
        asm.begin_function(symbol);
        asm.directive(&format!(".globl {}", symbol));
        asm.directive(&format!(".p2align {}", self.function_alignment()));
        asm.label(symbol);
    }

    fn prologue(&self, asm: &mut Asm, frame: &Frame<'_>);

    /// Restores the callee-saved registers and the caller's frame, then
    /// returns.
    fn epilogue(&self, asm: &mut Asm, frame: &Frame<'_>);

    fn load_imm(&self, asm: &mut Asm, dst: AsmReg, value: i64);

    fn mov(&self, asm: &mut Asm, dst: AsmReg, src: AsmReg);

    fn load_word(&self, asm: &mut Asm, frame: &Frame<'_>, dst: AsmReg, word: u32);

    fn store_word(&self, asm: &mut Asm, frame: &Frame<'_>, word: u32, src: AsmReg);

    /// Address of a frame word.
    fn word_address(&self, asm: &mut Asm, frame: &Frame<'_>, dst: AsmReg, word: u32);

    /// Stack-passed parameter `index` (counted from the first stack argument).
    fn load_incoming_arg(&self, asm: &mut Asm, dst: AsmReg, index: u32);

    /// Outgoing stack argument `index` of the call being set up.
    fn store_outgoing_arg(&self, asm: &mut Asm, index: u32, src: AsmReg);

    fn load_mem(&self, asm: &mut Asm, dst: AsmReg, base: AsmReg, offset: i32);

    fn store_mem(&self, asm: &mut Asm, base: AsmReg, offset: i32, src: AsmReg);

    fn symbol_address(&self, asm: &mut Asm, dst: AsmReg, symbol: &str);

    /// Whether `op` can take `value` as an immediate right operand.
    fn alu_imm_fits(&self, op: BinaryOp, value: i64) -> bool;

    /// `dst = lhs op rhs` with the integer semantics of the IR (wrapping,
    /// division by zero yields 0). `dst` never aliases `rhs` unless both are
    /// scratch.
    fn binop(&self, asm: &mut Asm, op: BinaryOp, dst: AsmReg, lhs: AsmReg, rhs: Operand);

    fn call(&self, asm: &mut Asm, symbol: &str);

    /// Call through the code pointer of the closure in the first argument
    /// register.
    fn call_closure(&self, asm: &mut Asm);

    fn jump(&self, asm: &mut Asm, label: &str);

    fn branch_nonzero(&self, asm: &mut Asm, reg: AsmReg, label: &str);

    fn branch_zero(&self, asm: &mut Asm, reg: AsmReg, label: &str);
}

/// Allocation pool and register classes of `arch`.
pub fn reg_config(arch: Arch) -> RegConfig {
    match arch {
        Arch::Amd64 => amd64::reg_config(),
        Arch::Arm64 => arm64::reg_config(),
        Arch::Riscv64 => riscv64::reg_config(),
    }
}

/// Directives opening every module. ELF objects get an empty
/// `.note.GNU-stack` so the linker keeps the stack non-executable; Mach-O has
/// no such note.
pub fn module_prelude(arch: Arch, mach_o: bool) -> String {
    if mach_o {
        return "    .text\n".to_string();
    }
    // `@` starts a comment in some ARM assemblers.
    let kind = match arch {
        Arch::Arm64 => "%progbits",
        Arch::Amd64 | Arch::Riscv64 => "@progbits",
    };
    format!("    .section .note.GNU-stack,\"\",{}\n    .text\n", kind)
}

/// Emit `func` for `arch` using a finished allocation.
pub fn emit_function(
    arch: Arch,
    func: &Function,
    alloc: &Allocation,
    classes: &ClassTable,
    session: &CompilationSession<'_>,
    symbol_prefix: &str,
) -> CompileResult<String> {
    match arch {
        Arch::Amd64 => {
            let backend = amd64::Amd64Backend::new(symbol_prefix);
            FunctionEmitter::new(&backend, func, alloc, classes, session).emit()
        }
        Arch::Arm64 => {
            let backend = arm64::Arm64Backend::new(symbol_prefix);
            FunctionEmitter::new(&backend, func, alloc, classes, session).emit()
        }
        Arch::Riscv64 => {
            let backend = riscv64::Riscv64Backend::new(symbol_prefix);
            FunctionEmitter::new(&backend, func, alloc, classes, session).emit()
        }
    }
}

/// Check emitted assembly against the rules of `arch`.
pub fn validate_assembly(arch: Arch, text: &str) -> CompileResult<()> {
    let issues = match arch {
        Arch::Amd64 => validate(&amd64::Amd64Validator, text),
        Arch::Arm64 => validate(&arm64::Arm64Validator, text),
        Arch::Riscv64 => validate(&riscv64::Riscv64Validator, text),
    };
    if issues.is_empty() {
        Ok(())
    } else {
        Err(CompileError::Validation { issues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asm_buffer_counts_lines() {
        let mut asm = Asm::new();
        asm.directive(".globl f");
        asm.label("f");
        emit!(asm, "ret");
        assert_eq!(asm.line_count(), 3);
        assert_eq!(asm.finish(), "    .globl f\nf:\n    ret\n");
    }

    #[test]
    fn test_elf_prelude_marks_stack_non_executable() {
        for arch in [Arch::Amd64, Arch::Arm64, Arch::Riscv64] {
            let prelude = module_prelude(arch, false);
            assert!(prelude.contains(".section .note.GNU-stack,\"\","), "{}", prelude);
            assert!(prelude.trim_end().ends_with(".text"), "{}", prelude);
            validate_assembly(arch, &prelude).unwrap_or_else(|e| panic!("{}: {}", arch, e));
        }
        assert!(module_prelude(Arch::Arm64, false).contains("%progbits"));
        assert_eq!(module_prelude(Arch::Amd64, true), "    .text\n");
    }

    #[test]
    fn test_fresh_labels_are_scoped_to_the_function() {
        let mut asm = Asm::new();
        asm.begin_function("f");
        assert_eq!(asm.fresh_label("div"), ".Lf.div0");
        assert_eq!(asm.fresh_label("div"), ".Lf.div1");
        asm.begin_function("g");
        assert_eq!(asm.fresh_label("div"), ".Lg.div0");
    }

    #[test]
    fn test_reg_configs_keep_scratch_out_of_pool() {
        for arch in [Arch::Amd64, Arch::Arm64, Arch::Riscv64] {
            let config = reg_config(arch);
            let (temp, rhs, cycle, args) = match arch {
                Arch::Amd64 => {
                    let b = amd64::Amd64Backend::new("");
                    (b.temp_reg(), b.rhs_reg(), b.cycle_reg(), b.arg_regs())
                }
                Arch::Arm64 => {
                    let b = arm64::Arm64Backend::new("");
                    (b.temp_reg(), b.rhs_reg(), b.cycle_reg(), b.arg_regs())
                }
                Arch::Riscv64 => {
                    let b = riscv64::Riscv64Backend::new("");
                    (b.temp_reg(), b.rhs_reg(), b.cycle_reg(), b.arg_regs())
                }
            };
            for reg in [temp, rhs, cycle].iter().chain(args) {
                assert!(!config.is_allocatable(*reg), "{} pool holds {:?}", arch, reg);
            }
            assert!(!config.allocatable_callee_saved().is_empty());
            assert!(!config.allocatable_caller_saved().is_empty());
        }
    }
}
