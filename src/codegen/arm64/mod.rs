// AAPCS64. The prologue pushes the frame record (x29, x30) with a
// pre-indexed stp, points x29 at it and drops sp by the frame size; frame
// words are addressed upwards from sp above the outgoing argument area, and
// incoming stack arguments sit at [x29, #16] and above. x9 and x10 carry
// operands, x16 breaks move cycles and doubles as the indirect-call register,
// and x17 builds addresses whose offsets do not fit the scaled 12-bit field.
// x18 is the platform register and is never touched.

//! arm64 instruction selection and ABI tables.

mod validator;

pub use validator::Arm64Validator;

use crate::core::{Arch, AsmReg};
use crate::ir::BinaryOp;
use crate::regalloc::RegConfig;

use super::frame::Frame;
use super::{Asm, Backend, Operand};

pub const X0: AsmReg = AsmReg::gp(0);
pub const X9: AsmReg = AsmReg::gp(9);
pub const X10: AsmReg = AsmReg::gp(10);
pub const X16: AsmReg = AsmReg::gp(16);
pub const X17: AsmReg = AsmReg::gp(17);
pub const X18: AsmReg = AsmReg::gp(18);
pub const FP: AsmReg = AsmReg::gp(29);
pub const LR: AsmReg = AsmReg::gp(30);
pub const SP: AsmReg = AsmReg::gp(31);

const REG_NAMES: [&str; 32] = [
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14",
    "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27",
    "x28", "x29", "x30", "sp",
];

const ARG_REGS: [AsmReg; 8] = [
    AsmReg::gp(0),
    AsmReg::gp(1),
    AsmReg::gp(2),
    AsmReg::gp(3),
    AsmReg::gp(4),
    AsmReg::gp(5),
    AsmReg::gp(6),
    AsmReg::gp(7),
];

const RESERVED: [AsmReg; 8] = [X9, X10, X16, X17, X18, FP, LR, SP];

/// Largest offset a scaled 64-bit ldr/str can encode.
const MAX_SCALED_OFFSET: i64 = 32760;

pub fn reg_config() -> RegConfig {
    let pool: Vec<AsmReg> = (11..=15).chain(19..=28).map(AsmReg::gp).collect();
    let callee_saved: Vec<AsmReg> = (19..=28).map(AsmReg::gp).collect();
    let caller_saved: Vec<AsmReg> = (0..=18).map(AsmReg::gp).collect();
    RegConfig::new(&pool, &RESERVED, &callee_saved, &caller_saved)
}

/// Whether a ldr/str can address `offset` directly.
fn direct_offset(offset: i64) -> bool {
    (0..=MAX_SCALED_OFFSET).contains(&offset) && offset % 8 == 0 || (-256..=255).contains(&offset)
}

pub struct Arm64Backend {
    prefix: String,
}

impl Arm64Backend {
    pub fn new(symbol_prefix: &str) -> Self {
        Self {
            prefix: symbol_prefix.to_string(),
        }
    }

    fn name(&self, reg: AsmReg) -> &'static str {
        self.reg_name(reg)
    }

    /// Mach-O symbols carry a leading underscore and use @PAGE relocations.
    fn is_macho(&self) -> bool {
        self.prefix == "_"
    }

    /// `ldr`/`str` of `reg` at `base + offset`, going through x17 when the
    /// offset does not encode.
    fn access(&self, asm: &mut Asm, mnemonic: &str, reg: AsmReg, base: AsmReg, offset: i64) {
        let (r, b) = (self.name(reg), self.name(base));
        if offset == 0 {
            emit!(asm, "{} {}, [{}]", mnemonic, r, b);
        } else if direct_offset(offset) {
            emit!(asm, "{} {}, [{}, #{}]", mnemonic, r, b, offset);
        } else {
            self.load_imm(asm, X17, offset);
            emit!(asm, "add x17, {}, x17", b);
            emit!(asm, "{} {}, [x17]", mnemonic, r);
        }
    }

    fn operand(&self, op: Operand) -> String {
        match op {
            Operand::Reg(reg) => self.name(reg).to_string(),
            Operand::Imm(v) => format!("#{}", v),
        }
    }
}

impl Backend for Arm64Backend {
    fn arch(&self) -> Arch {
        Arch::Arm64
    }

    fn reg_config(&self) -> RegConfig {
        reg_config()
    }

    fn arg_regs(&self) -> &'static [AsmReg] {
        &ARG_REGS
    }

    fn ret_reg(&self) -> AsmReg {
        X0
    }

    fn temp_reg(&self) -> AsmReg {
        X9
    }

    fn rhs_reg(&self) -> AsmReg {
        X10
    }

    fn cycle_reg(&self) -> AsmReg {
        X16
    }

    fn reg_name(&self, reg: AsmReg) -> &'static str {
        REG_NAMES[reg.id as usize & 31]
    }

    fn symbol(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn function_alignment(&self) -> u32 {
        2
    }

    fn prologue(&self, asm: &mut Asm, frame: &Frame<'_>) {
        emit!(asm, "stp x29, x30, [sp, #-16]!");
        emit!(asm, "mov x29, sp");
        let size = frame.size() as i64;
        if size > 4095 {
            self.load_imm(asm, X9, size);
            emit!(asm, "sub sp, sp, x9");
        } else if size > 0 {
            emit!(asm, "sub sp, sp, #{}", size);
        }
        for (index, &reg) in frame.saved_registers.iter().enumerate() {
            let offset = frame.sp_offset(frame.save_word(index));
            self.access(asm, "str", reg, SP, offset);
        }
    }

    fn epilogue(&self, asm: &mut Asm, frame: &Frame<'_>) {
        for (index, &reg) in frame.saved_registers.iter().enumerate().rev() {
            let offset = frame.sp_offset(frame.save_word(index));
            self.access(asm, "ldr", reg, SP, offset);
        }
        emit!(asm, "mov sp, x29");
        emit!(asm, "ldp x29, x30, [sp], #16");
        emit!(asm, "ret");
    }

    fn load_imm(&self, asm: &mut Asm, dst: AsmReg, value: i64) {
        let d = self.name(dst);
        if (0..=0xffff).contains(&value) {
            emit!(asm, "mov {}, #{}", d, value);
            return;
        }
        if (0..=0xffff).contains(&!value) {
            emit!(asm, "movn {}, #{}", d, !value);
            return;
        }
        let bits = value as u64;
        let mut first = true;
        for shift in [0u32, 16, 32, 48] {
            let chunk = (bits >> shift) & 0xffff;
            if chunk == 0 {
                continue;
            }
            let mnemonic = if first { "movz" } else { "movk" };
            if shift == 0 {
                emit!(asm, "{} {}, #{}", mnemonic, d, chunk);
            } else {
                emit!(asm, "{} {}, #{}, lsl #{}", mnemonic, d, chunk, shift);
            }
            first = false;
        }
    }

    fn mov(&self, asm: &mut Asm, dst: AsmReg, src: AsmReg) {
        emit!(asm, "mov {}, {}", self.name(dst), self.name(src));
    }

    fn load_word(&self, asm: &mut Asm, frame: &Frame<'_>, dst: AsmReg, word: u32) {
        self.access(asm, "ldr", dst, SP, frame.sp_offset(word));
    }

    fn store_word(&self, asm: &mut Asm, frame: &Frame<'_>, word: u32, src: AsmReg) {
        self.access(asm, "str", src, SP, frame.sp_offset(word));
    }

    fn word_address(&self, asm: &mut Asm, frame: &Frame<'_>, dst: AsmReg, word: u32) {
        let offset = frame.sp_offset(word);
        if offset <= 4095 {
            emit!(asm, "add {}, sp, #{}", self.name(dst), offset);
        } else {
            self.load_imm(asm, X17, offset);
            emit!(asm, "add {}, sp, x17", self.name(dst));
        }
    }

    fn load_incoming_arg(&self, asm: &mut Asm, dst: AsmReg, index: u32) {
        self.access(asm, "ldr", dst, FP, 16 + 8 * index as i64);
    }

    fn store_outgoing_arg(&self, asm: &mut Asm, index: u32, src: AsmReg) {
        self.access(asm, "str", src, SP, 8 * index as i64);
    }

    fn load_mem(&self, asm: &mut Asm, dst: AsmReg, base: AsmReg, offset: i32) {
        self.access(asm, "ldr", dst, base, offset as i64);
    }

    fn store_mem(&self, asm: &mut Asm, base: AsmReg, offset: i32, src: AsmReg) {
        self.access(asm, "str", src, base, offset as i64);
    }

    fn symbol_address(&self, asm: &mut Asm, dst: AsmReg, symbol: &str) {
        let d = self.name(dst);
        if self.is_macho() {
            emit!(asm, "adrp {}, {}@PAGE", d, symbol);
            emit!(asm, "add {}, {}, {}@PAGEOFF", d, d, symbol);
        } else {
            emit!(asm, "adrp {}, {}", d, symbol);
            emit!(asm, "add {}, {}, :lo12:{}", d, d, symbol);
        }
    }

    fn alu_imm_fits(&self, op: BinaryOp, value: i64) -> bool {
        match op {
            BinaryOp::Add | BinaryOp::Sub => (0..=4095).contains(&value),
            op if op.is_comparison() => (0..=4095).contains(&value),
            _ => false,
        }
    }

    fn binop(&self, asm: &mut Asm, op: BinaryOp, dst: AsmReg, lhs: AsmReg, rhs: Operand) {
        let (d, l, r) = (self.name(dst), self.name(lhs), self.operand(rhs));
        let cond = match op {
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            _ => {
                // sdiv already yields 0 for a zero divisor and wraps
                // i64::MIN / -1.
                let mnemonic = match op {
                    BinaryOp::Add => "add",
                    BinaryOp::Sub => "sub",
                    BinaryOp::Mul => "mul",
                    BinaryOp::Div => "sdiv",
                    BinaryOp::And => "and",
                    BinaryOp::Or => "orr",
                    _ => "eor",
                };
                emit!(asm, "{} {}, {}, {}", mnemonic, d, l, r);
                return;
            }
        };
        emit!(asm, "cmp {}, {}", l, r);
        emit!(asm, "cset {}, {}", d, cond);
    }

    fn call(&self, asm: &mut Asm, symbol: &str) {
        emit!(asm, "bl {}", symbol);
    }

    fn call_closure(&self, asm: &mut Asm) {
        emit!(asm, "ldr x16, [x0, #16]");
        emit!(asm, "blr x16");
    }

    fn jump(&self, asm: &mut Asm, label: &str) {
        emit!(asm, "b {}", label);
    }

    fn branch_nonzero(&self, asm: &mut Asm, reg: AsmReg, label: &str) {
        emit!(asm, "cbnz {}, {}", self.name(reg), label);
    }

    fn branch_zero(&self, asm: &mut Asm, reg: AsmReg, label: &str) {
        emit!(asm, "cbz {}, {}", self.name(reg), label);
    }
}
