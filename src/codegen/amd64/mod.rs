// System V amd64 in AT&T syntax. Frames are rbp-based: the prologue pushes
// rbp, points it at the saved copy and drops rsp by the 16-byte-aligned frame
// size, so every frame word has a fixed negative rbp offset and stack
// arguments of the incoming call sit at 16(%rbp) and above. rax, r11 and rdx
// are never allocated; they carry the left operand (and results headed for a
// spill slot), the right operand, and the value that breaks a move cycle.
// Division uses rax:rdx as the ISA requires, and comparisons materialize
// their flag through %al.

//! amd64 instruction selection and ABI tables.

mod validator;

pub use validator::Amd64Validator;

use crate::core::{Arch, AsmReg};
use crate::ir::BinaryOp;
use crate::regalloc::RegConfig;

use super::frame::Frame;
use super::{Asm, Backend, Operand};

pub const RAX: AsmReg = AsmReg::gp(0);
pub const RCX: AsmReg = AsmReg::gp(1);
pub const RDX: AsmReg = AsmReg::gp(2);
pub const RBX: AsmReg = AsmReg::gp(3);
pub const RSP: AsmReg = AsmReg::gp(4);
pub const RBP: AsmReg = AsmReg::gp(5);
pub const RSI: AsmReg = AsmReg::gp(6);
pub const RDI: AsmReg = AsmReg::gp(7);
pub const R8: AsmReg = AsmReg::gp(8);
pub const R9: AsmReg = AsmReg::gp(9);
pub const R10: AsmReg = AsmReg::gp(10);
pub const R11: AsmReg = AsmReg::gp(11);
pub const R12: AsmReg = AsmReg::gp(12);
pub const R13: AsmReg = AsmReg::gp(13);
pub const R14: AsmReg = AsmReg::gp(14);
pub const R15: AsmReg = AsmReg::gp(15);

const REG_NAMES: [&str; 16] = [
    "%rax", "%rcx", "%rdx", "%rbx", "%rsp", "%rbp", "%rsi", "%rdi", "%r8", "%r9", "%r10", "%r11",
    "%r12", "%r13", "%r14", "%r15",
];

/// System V integer argument registers.
const ARG_REGS: [AsmReg; 6] = [RDI, RSI, RDX, RCX, R8, R9];

const POOL: [AsmReg; 6] = [R10, RBX, R12, R13, R14, R15];
const RESERVED: [AsmReg; 5] = [RSP, RBP, RAX, R11, RDX];
const CALLEE_SAVED: [AsmReg; 5] = [RBX, R12, R13, R14, R15];
const CALLER_SAVED: [AsmReg; 9] = [RAX, RDI, RSI, RDX, RCX, R8, R9, R10, R11];

pub fn reg_config() -> RegConfig {
    RegConfig::new(&POOL, &RESERVED, &CALLEE_SAVED, &CALLER_SAVED)
}

fn fits_i32(value: i64) -> bool {
    i32::try_from(value).is_ok()
}

/// `offset(base)` memory operand.
fn mem(offset: i64, base: &str) -> String {
    if offset == 0 {
        format!("({})", base)
    } else {
        format!("{}({})", offset, base)
    }
}

pub struct Amd64Backend {
    prefix: String,
}

impl Amd64Backend {
    pub fn new(symbol_prefix: &str) -> Self {
        Self {
            prefix: symbol_prefix.to_string(),
        }
    }

    fn name(&self, reg: AsmReg) -> &'static str {
        self.reg_name(reg)
    }

    fn word_operand(&self, frame: &Frame<'_>, word: u32) -> String {
        mem(frame.fp_offset(word), "%rbp")
    }

    fn operand(&self, op: Operand) -> String {
        match op {
            Operand::Reg(reg) => self.name(reg).to_string(),
            Operand::Imm(v) => format!("${}", v),
        }
    }

    /// Signed division with the IR's semantics: x / 0 is 0, and
    /// i64::MIN / -1 wraps instead of trapping.
    fn divide(&self, asm: &mut Asm, dst: AsmReg, lhs: AsmReg, rhs: AsmReg) {
        let zero = asm.fresh_label("div_zero");
        let negate = asm.fresh_label("div_neg");
        let done = asm.fresh_label("div_done");
        let r = self.name(rhs);
        if lhs != RAX {
            emit!(asm, "movq {}, %rax", self.name(lhs));
        }
        emit!(asm, "testq {}, {}", r, r);
        emit!(asm, "je {}", zero);
        emit!(asm, "cmpq $-1, {}", r);
        emit!(asm, "je {}", negate);
        emit!(asm, "cqto");
        emit!(asm, "idivq {}", r);
        emit!(asm, "jmp {}", done);
        asm.label(&zero);
        emit!(asm, "movq $0, %rax");
        emit!(asm, "jmp {}", done);
        asm.label(&negate);
        emit!(asm, "negq %rax");
        asm.label(&done);
        if dst != RAX {
            emit!(asm, "movq %rax, {}", self.name(dst));
        }
    }
}

impl Backend for Amd64Backend {
    fn arch(&self) -> Arch {
        Arch::Amd64
    }

    fn reg_config(&self) -> RegConfig {
        reg_config()
    }

    fn arg_regs(&self) -> &'static [AsmReg] {
        &ARG_REGS
    }

    fn ret_reg(&self) -> AsmReg {
        RAX
    }

    fn temp_reg(&self) -> AsmReg {
        RAX
    }

    fn rhs_reg(&self) -> AsmReg {
        R11
    }

    fn cycle_reg(&self) -> AsmReg {
        RDX
    }

    fn reg_name(&self, reg: AsmReg) -> &'static str {
        REG_NAMES[reg.id as usize & 15]
    }

    fn symbol(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn function_alignment(&self) -> u32 {
        4
    }

    fn prologue(&self, asm: &mut Asm, frame: &Frame<'_>) {
        emit!(asm, "pushq %rbp");
        emit!(asm, "movq %rsp, %rbp");
        if frame.size() > 0 {
            emit!(asm, "subq ${}, %rsp", frame.size());
        }
        for (index, &reg) in frame.saved_registers.iter().enumerate() {
            let slot = self.word_operand(frame, frame.save_word(index));
            emit!(asm, "movq {}, {}", self.name(reg), slot);
        }
    }

    fn epilogue(&self, asm: &mut Asm, frame: &Frame<'_>) {
        for (index, &reg) in frame.saved_registers.iter().enumerate().rev() {
            let slot = self.word_operand(frame, frame.save_word(index));
            emit!(asm, "movq {}, {}", slot, self.name(reg));
        }
        emit!(asm, "movq %rbp, %rsp");
        emit!(asm, "popq %rbp");
        emit!(asm, "ret");
    }

    fn load_imm(&self, asm: &mut Asm, dst: AsmReg, value: i64) {
        if fits_i32(value) {
            emit!(asm, "movq ${}, {}", value, self.name(dst));
        } else {
            emit!(asm, "movabsq ${}, {}", value, self.name(dst));
        }
    }

    fn mov(&self, asm: &mut Asm, dst: AsmReg, src: AsmReg) {
        emit!(asm, "movq {}, {}", self.name(src), self.name(dst));
    }

    fn load_word(&self, asm: &mut Asm, frame: &Frame<'_>, dst: AsmReg, word: u32) {
        emit!(asm, "movq {}, {}", self.word_operand(frame, word), self.name(dst));
    }

    fn store_word(&self, asm: &mut Asm, frame: &Frame<'_>, word: u32, src: AsmReg) {
        emit!(asm, "movq {}, {}", self.name(src), self.word_operand(frame, word));
    }

    fn word_address(&self, asm: &mut Asm, frame: &Frame<'_>, dst: AsmReg, word: u32) {
        emit!(asm, "leaq {}, {}", self.word_operand(frame, word), self.name(dst));
    }

    fn load_incoming_arg(&self, asm: &mut Asm, dst: AsmReg, index: u32) {
        let offset = 16 + 8 * index as i64;
        emit!(asm, "movq {}, {}", mem(offset, "%rbp"), self.name(dst));
    }

    fn store_outgoing_arg(&self, asm: &mut Asm, index: u32, src: AsmReg) {
        emit!(asm, "movq {}, {}", self.name(src), mem(8 * index as i64, "%rsp"));
    }

    fn load_mem(&self, asm: &mut Asm, dst: AsmReg, base: AsmReg, offset: i32) {
        emit!(asm, "movq {}, {}", mem(offset as i64, self.name(base)), self.name(dst));
    }

    fn store_mem(&self, asm: &mut Asm, base: AsmReg, offset: i32, src: AsmReg) {
        emit!(asm, "movq {}, {}", self.name(src), mem(offset as i64, self.name(base)));
    }

    fn symbol_address(&self, asm: &mut Asm, dst: AsmReg, symbol: &str) {
        emit!(asm, "leaq {}(%rip), {}", symbol, self.name(dst));
    }

    fn alu_imm_fits(&self, op: BinaryOp, value: i64) -> bool {
        op != BinaryOp::Div && fits_i32(value)
    }

    fn binop(&self, asm: &mut Asm, op: BinaryOp, dst: AsmReg, lhs: AsmReg, rhs: Operand) {
        let d = self.name(dst);
        match op {
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::And
            | BinaryOp::Or
            | BinaryOp::Xor => {
                let mnemonic = match op {
                    BinaryOp::Add => "addq",
                    BinaryOp::Sub => "subq",
                    BinaryOp::Mul => "imulq",
                    BinaryOp::And => "andq",
                    BinaryOp::Or => "orq",
                    _ => "xorq",
                };
                if rhs == Operand::Reg(dst) && dst != lhs {
                    // dst = lhs op dst
                    if op.is_commutative() {
                        emit!(asm, "{} {}, {}", mnemonic, self.name(lhs), d);
                    } else {
                        emit!(asm, "negq {}", d);
                        emit!(asm, "addq {}, {}", self.name(lhs), d);
                    }
                    return;
                }
                if lhs != dst {
                    emit!(asm, "movq {}, {}", self.name(lhs), d);
                }
                emit!(asm, "{} {}, {}", mnemonic, self.operand(rhs), d);
            }
            BinaryOp::Div => {
                let rhs = match rhs {
                    Operand::Reg(reg) => reg,
                    Operand::Imm(v) => {
                        self.load_imm(asm, R11, v);
                        R11
                    }
                };
                self.divide(asm, dst, lhs, rhs);
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let set = match op {
                    BinaryOp::Eq => "sete",
                    BinaryOp::Ne => "setne",
                    BinaryOp::Lt => "setl",
                    BinaryOp::Le => "setle",
                    BinaryOp::Gt => "setg",
                    _ => "setge",
                };
                emit!(asm, "cmpq {}, {}", self.operand(rhs), self.name(lhs));
                emit!(asm, "{} %al", set);
                emit!(asm, "movzbq %al, {}", d);
            }
        }
    }

    fn call(&self, asm: &mut Asm, symbol: &str) {
        emit!(asm, "call {}", symbol);
    }

    fn call_closure(&self, asm: &mut Asm) {
        emit!(asm, "movq 16(%rdi), %rax");
        emit!(asm, "call *%rax");
    }

    fn jump(&self, asm: &mut Asm, label: &str) {
        emit!(asm, "jmp {}", label);
    }

    fn branch_nonzero(&self, asm: &mut Asm, reg: AsmReg, label: &str) {
        let r = self.name(reg);
        emit!(asm, "testq {}, {}", r, r);
        emit!(asm, "jne {}", label);
    }

    fn branch_zero(&self, asm: &mut Asm, reg: AsmReg, label: &str) {
        let r = self.name(reg);
        emit!(asm, "testq {}, {}", r, r);
        emit!(asm, "je {}", label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::validate_assembly;
    use crate::core::test_utils::test::assemble;
    use crate::core::OptLevel;

    fn compile(source: &str, name: &str) -> String {
        let text = assemble(source, name, Arch::Amd64, OptLevel::O2);
        if let Err(err) = validate_assembly(Arch::Amd64, &text) {
            panic!("{}\n{}", err, text);
        }
        text
    }

    #[test]
    fn test_add_lowering() {
        let text = compile("def add(a: int, b: int) -> int:\n    return a + b\n", "add");
        assert!(text.starts_with("    .globl add\n    .p2align 4\nadd:\n"));
        assert!(text.contains("addq"), "{}", text);
        assert!(text.contains("pushq %rbp"));
        assert!(text.trim_end().ends_with("ret"));
    }

    #[test]
    fn test_wide_immediates_use_movabsq() {
        let text = compile("def f(a: int) -> int:\n    return a + 5000000000\n", "f");
        assert!(text.contains("movabsq $5000000000, %r11"), "{}", text);
        let text = compile("def f(a: int) -> int:\n    return a + 7\n", "f");
        assert!(text.contains("addq $7,"), "{}", text);
    }

    #[test]
    fn test_comparison_sequence() {
        let text = compile("def lt(a: int, b: int) -> bool:\n    return a < b\n", "lt");
        let cmp = text.find("cmpq").expect("cmpq");
        let set = text.find("setl %al").expect("setl");
        let ext = text.find("movzbq %al,").expect("movzbq");
        assert!(cmp < set && set < ext, "{}", text);
    }

    #[test]
    fn test_division_guards_zero_and_minus_one() {
        let text = compile("def d(a: int, b: int) -> int:\n    return a / b\n", "d");
        for needle in ["testq", "cmpq $-1,", "cqto", "idivq", "negq %rax", ".Ld.div_done2:"] {
            assert!(text.contains(needle), "missing {}:\n{}", needle, text);
        }
    }

    #[test]
    fn test_value_live_across_call_is_preserved() {
        let source = "def g(x: int) -> int:\n    return x\n\ndef f(a: int) -> int:\n    b = g(a)\n    return a + b\n";
        let text = compile(source, "f");
        assert!(text.contains("call g"));
        // The saved register is written back before returning.
        assert!(text.contains("movq %rbx, -8(%rbp)"), "{}", text);
        assert!(text.contains("movq -8(%rbp), %rbx"), "{}", text);
    }

    #[test]
    fn test_stack_arguments_both_directions() {
        let source = "def h(a: int, b: int, c: int, d: int, e: int, f: int, g: int, k: int) -> int:\n    return g + k\n\ndef caller(x: int) -> int:\n    return h(x, 1, 2, 3, 4, 5, 6, 7)\n";
        let callee = compile(source, "h");
        assert!(callee.contains("16(%rbp)"), "{}", callee);
        assert!(callee.contains("24(%rbp)"), "{}", callee);
        let caller = compile(source, "caller");
        assert!(caller.contains(", (%rsp)"), "{}", caller);
        assert!(caller.contains(", 8(%rsp)"), "{}", caller);
        // Two outgoing words on top of any callee-saved slots, kept aligned.
        let frame: u32 = caller
            .lines()
            .find_map(|l| l.trim().strip_prefix("subq $")?.strip_suffix(", %rsp"))
            .and_then(|n| n.parse().ok())
            .expect("frame reservation");
        let prologue = caller.split("call h").next().unwrap_or_default();
        let saves = ["%rbx", "%r12", "%r13", "%r14", "%r15"]
            .iter()
            .filter(|reg| prologue.contains(&format!("movq {}, -", reg)))
            .count() as u32
            * 8;
        assert!(frame >= saves + 16, "{}", caller);
        assert_eq!(frame % 16, 0, "{}", caller);
    }

    #[test]
    fn test_loop_validates() {
        let source = "def sum(n: int) -> int:\n    total = 0\n    for i in range(n):\n        if i > 3:\n            total = total + i * 2\n        else:\n            continue\n    return total\n";
        let text = compile(source, "sum");
        assert!(text.contains(".Lsum.for_header_0:"), "{}", text);
    }

    #[test]
    fn test_symbol_prefix() {
        let backend = Amd64Backend::new("_");
        assert_eq!(backend.symbol("main"), "_main");
        let mut asm = Asm::new();
        backend.function_header(&mut asm, &backend.symbol("main"));
        assert!(asm.as_str().contains(".globl _main"));
    }
}
