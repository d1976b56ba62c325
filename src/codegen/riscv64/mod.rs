// RV64GC with the standard LP64 calling convention. The prologue stores ra
// and s0 in a 16-byte record, points s0 at the caller's sp and then drops sp
// by the frame size; frame words are sp-relative and incoming stack
// arguments start at 0(s0). t0 and t1 carry operands and t2 breaks move
// cycles. ra is dead between the prologue and the epilogue apart from calls,
// so it builds addresses whose offsets do not fit the 12-bit field.

//! riscv64 instruction selection and ABI tables.

mod validator;

pub use validator::Riscv64Validator;

use crate::core::{Arch, AsmReg};
use crate::ir::BinaryOp;
use crate::regalloc::RegConfig;

use super::frame::Frame;
use super::{Asm, Backend, Operand};

pub const ZERO: AsmReg = AsmReg::gp(0);
pub const RA: AsmReg = AsmReg::gp(1);
pub const SP: AsmReg = AsmReg::gp(2);
pub const GP: AsmReg = AsmReg::gp(3);
pub const TP: AsmReg = AsmReg::gp(4);
pub const T0: AsmReg = AsmReg::gp(5);
pub const T1: AsmReg = AsmReg::gp(6);
pub const T2: AsmReg = AsmReg::gp(7);
pub const S0: AsmReg = AsmReg::gp(8);
pub const A0: AsmReg = AsmReg::gp(10);

/// ABI names indexed by hardware number.
pub const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

const ARG_REGS: [AsmReg; 8] = [
    AsmReg::gp(10),
    AsmReg::gp(11),
    AsmReg::gp(12),
    AsmReg::gp(13),
    AsmReg::gp(14),
    AsmReg::gp(15),
    AsmReg::gp(16),
    AsmReg::gp(17),
];

const RESERVED: [AsmReg; 9] = [ZERO, RA, SP, GP, TP, T0, T1, T2, S0];

pub fn reg_config() -> RegConfig {
    let pool: Vec<AsmReg> = (28..=31).chain([9]).chain(18..=27).map(AsmReg::gp).collect();
    let callee_saved: Vec<AsmReg> = [8, 9].into_iter().chain(18..=27).map(AsmReg::gp).collect();
    let caller_saved: Vec<AsmReg> = (5..=7).chain(10..=17).chain(28..=31).map(AsmReg::gp).collect();
    RegConfig::new(&pool, &RESERVED, &callee_saved, &caller_saved)
}

fn fits_12(value: i64) -> bool {
    (-2048..=2047).contains(&value)
}

/// Sign-extend the low 12 bits.
fn sext12(value: i64) -> i64 {
    ((value & 0xfff) ^ 0x800) - 0x800
}

pub struct Riscv64Backend {
    prefix: String,
}

impl Riscv64Backend {
    pub fn new(symbol_prefix: &str) -> Self {
        Self {
            prefix: symbol_prefix.to_string(),
        }
    }

    fn name(&self, reg: AsmReg) -> &'static str {
        self.reg_name(reg)
    }

    fn access(&self, asm: &mut Asm, mnemonic: &str, reg: AsmReg, base: AsmReg, offset: i64) {
        if fits_12(offset) {
            emit!(asm, "{} {}, {}({})", mnemonic, self.name(reg), offset, self.name(base));
        } else {
            self.load_imm(asm, RA, offset);
            emit!(asm, "add ra, {}, ra", self.name(base));
            emit!(asm, "{} {}, 0(ra)", mnemonic, self.name(reg));
        }
    }

    fn adjust_sp(&self, asm: &mut Asm, bytes: i64) {
        if fits_12(bytes) {
            emit!(asm, "addi sp, sp, {}", bytes);
        } else {
            self.load_imm(asm, T0, bytes);
            emit!(asm, "add sp, sp, t0");
        }
    }
}

impl Backend for Riscv64Backend {
    fn arch(&self) -> Arch {
        Arch::Riscv64
    }

    fn reg_config(&self) -> RegConfig {
        reg_config()
    }

    fn arg_regs(&self) -> &'static [AsmReg] {
        &ARG_REGS
    }

    fn ret_reg(&self) -> AsmReg {
        A0
    }

    fn temp_reg(&self) -> AsmReg {
        T0
    }

    fn rhs_reg(&self) -> AsmReg {
        T1
    }

    fn cycle_reg(&self) -> AsmReg {
        T2
    }

    fn reg_name(&self, reg: AsmReg) -> &'static str {
        ABI_NAMES[reg.id as usize & 31]
    }

    fn symbol(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn function_alignment(&self) -> u32 {
        2
    }

    fn prologue(&self, asm: &mut Asm, frame: &Frame<'_>) {
        emit!(asm, "addi sp, sp, -16");
        emit!(asm, "sd ra, 8(sp)");
        emit!(asm, "sd s0, 0(sp)");
        emit!(asm, "addi s0, sp, 16");
        let size = frame.size() as i64;
        if size > 0 {
            self.adjust_sp(asm, -size);
        }
        for (index, &reg) in frame.saved_registers.iter().enumerate() {
            let offset = frame.sp_offset(frame.save_word(index));
            self.access(asm, "sd", reg, SP, offset);
        }
    }

    fn epilogue(&self, asm: &mut Asm, frame: &Frame<'_>) {
        for (index, &reg) in frame.saved_registers.iter().enumerate().rev() {
            let offset = frame.sp_offset(frame.save_word(index));
            self.access(asm, "ld", reg, SP, offset);
        }
        emit!(asm, "addi sp, s0, -16");
        emit!(asm, "ld ra, 8(sp)");
        emit!(asm, "ld s0, 0(sp)");
        emit!(asm, "addi sp, sp, 16");
        emit!(asm, "ret");
    }

    fn load_imm(&self, asm: &mut Asm, dst: AsmReg, value: i64) {
        let d = self.name(dst);
        if fits_12(value) {
            emit!(asm, "addi {}, zero, {}", d, value);
            return;
        }
        if i32::try_from(value).is_ok() {
            let lo = sext12(value);
            let hi20 = ((value - lo) >> 12) & 0xfffff;
            emit!(asm, "lui {}, {}", d, hi20);
            if lo != 0 {
                emit!(asm, "addiw {}, {}, {}", d, d, lo);
            }
            return;
        }
        // value = (hi << shift) + lo, with hi materialized recursively.
        let lo = sext12(value);
        let hi = value.wrapping_sub(lo) >> 12;
        let zeros = hi.trailing_zeros();
        self.load_imm(asm, dst, hi >> zeros);
        emit!(asm, "slli {}, {}, {}", d, d, 12 + zeros);
        if lo != 0 {
            emit!(asm, "addi {}, {}, {}", d, d, lo);
        }
    }

    fn mov(&self, asm: &mut Asm, dst: AsmReg, src: AsmReg) {
        emit!(asm, "mv {}, {}", self.name(dst), self.name(src));
    }

    fn load_word(&self, asm: &mut Asm, frame: &Frame<'_>, dst: AsmReg, word: u32) {
        self.access(asm, "ld", dst, SP, frame.sp_offset(word));
    }

    fn store_word(&self, asm: &mut Asm, frame: &Frame<'_>, word: u32, src: AsmReg) {
        self.access(asm, "sd", src, SP, frame.sp_offset(word));
    }

    fn word_address(&self, asm: &mut Asm, frame: &Frame<'_>, dst: AsmReg, word: u32) {
        let offset = frame.sp_offset(word);
        let d = self.name(dst);
        if fits_12(offset) {
            emit!(asm, "addi {}, sp, {}", d, offset);
        } else {
            self.load_imm(asm, dst, offset);
            emit!(asm, "add {}, sp, {}", d, d);
        }
    }

    fn load_incoming_arg(&self, asm: &mut Asm, dst: AsmReg, index: u32) {
        self.access(asm, "ld", dst, S0, 8 * index as i64);
    }

    fn store_outgoing_arg(&self, asm: &mut Asm, index: u32, src: AsmReg) {
        self.access(asm, "sd", src, SP, 8 * index as i64);
    }

    fn load_mem(&self, asm: &mut Asm, dst: AsmReg, base: AsmReg, offset: i32) {
        self.access(asm, "ld", dst, base, offset as i64);
    }

    fn store_mem(&self, asm: &mut Asm, base: AsmReg, offset: i32, src: AsmReg) {
        self.access(asm, "sd", src, base, offset as i64);
    }

    fn symbol_address(&self, asm: &mut Asm, dst: AsmReg, symbol: &str) {
        emit!(asm, "lla {}, {}", self.name(dst), symbol);
    }

    fn alu_imm_fits(&self, op: BinaryOp, value: i64) -> bool {
        match op {
            BinaryOp::Add | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => fits_12(value),
            BinaryOp::Sub => fits_12(value.wrapping_neg()) && value != i64::MIN,
            _ => false,
        }
    }

    fn binop(&self, asm: &mut Asm, op: BinaryOp, dst: AsmReg, lhs: AsmReg, rhs: Operand) {
        let (d, l) = (self.name(dst), self.name(lhs));
        let r = match rhs {
            Operand::Imm(v) => {
                let mnemonic = match op {
                    BinaryOp::Add => "addi",
                    BinaryOp::Sub => {
                        emit!(asm, "addi {}, {}, {}", d, l, -v);
                        return;
                    }
                    BinaryOp::And => "andi",
                    BinaryOp::Or => "ori",
                    BinaryOp::Xor => "xori",
                    _ => {
                        self.load_imm(asm, T1, v);
                        return self.binop(asm, op, dst, lhs, Operand::Reg(T1));
                    }
                };
                emit!(asm, "{} {}, {}, {}", mnemonic, d, l, v);
                return;
            }
            Operand::Reg(reg) => self.name(reg),
        };
        match op {
            BinaryOp::Add => emit!(asm, "add {}, {}, {}", d, l, r),
            BinaryOp::Sub => emit!(asm, "sub {}, {}, {}", d, l, r),
            BinaryOp::Mul => emit!(asm, "mul {}, {}, {}", d, l, r),
            BinaryOp::Div => {
                // div yields -1 for a zero divisor; mask the result to 0.
                emit!(asm, "seqz t2, {}", r);
                emit!(asm, "addi t2, t2, -1");
                emit!(asm, "div {}, {}, {}", d, l, r);
                emit!(asm, "and {}, {}, t2", d, d);
            }
            BinaryOp::And => emit!(asm, "and {}, {}, {}", d, l, r),
            BinaryOp::Or => emit!(asm, "or {}, {}, {}", d, l, r),
            BinaryOp::Xor => emit!(asm, "xor {}, {}, {}", d, l, r),
            BinaryOp::Eq => {
                emit!(asm, "xor {}, {}, {}", d, l, r);
                emit!(asm, "sltiu {}, {}, 1", d, d);
            }
            BinaryOp::Ne => {
                emit!(asm, "xor {}, {}, {}", d, l, r);
                emit!(asm, "sltu {}, zero, {}", d, d);
            }
            BinaryOp::Lt => emit!(asm, "slt {}, {}, {}", d, l, r),
            BinaryOp::Gt => emit!(asm, "slt {}, {}, {}", d, r, l),
            BinaryOp::Le => {
                emit!(asm, "slt {}, {}, {}", d, r, l);
                emit!(asm, "xori {}, {}, 1", d, d);
            }
            BinaryOp::Ge => {
                emit!(asm, "slt {}, {}, {}", d, l, r);
                emit!(asm, "xori {}, {}, 1", d, d);
            }
        }
    }

    fn call(&self, asm: &mut Asm, symbol: &str) {
        emit!(asm, "call {}", symbol);
    }

    fn call_closure(&self, asm: &mut Asm) {
        emit!(asm, "ld t0, 16(a0)");
        emit!(asm, "jalr t0");
    }

    fn jump(&self, asm: &mut Asm, label: &str) {
        emit!(asm, "j {}", label);
    }

    fn branch_nonzero(&self, asm: &mut Asm, reg: AsmReg, label: &str) {
        emit!(asm, "bnez {}, {}", self.name(reg), label);
    }

    fn branch_zero(&self, asm: &mut Asm, reg: AsmReg, label: &str) {
        emit!(asm, "beqz {}, {}", self.name(reg), label);
    }
}
