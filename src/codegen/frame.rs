//! Stack frame layout shared by every target.
//!
//! Below the frame record (saved frame pointer and return address) a frame
//! holds 8-byte words numbered from 0: the callee-saved register saves, then
//! the spill slots, then the cells of `Alloc` instructions. Below the words
//! sits the outgoing argument area used by calls that pass arguments on the
//! stack. The total is rounded up to 16 bytes.

use bumpalo::{collections::Vec as BumpVec, Bump};

use crate::core::{AsmReg, RegBitSet};
use crate::ir::{Function, Inst};

/// Stack layout of one function.
#[derive(Debug)]
pub struct Frame<'a> {
    /// Callee-saved registers the body writes, saved in the prologue.
    pub saved_registers: BumpVec<'a, AsmReg>,
    pub spill_slots: u32,
    /// Frame cells reserved by `Alloc`.
    pub cells: u32,
    /// Words of outgoing stack arguments needed by the largest call.
    pub outgoing_words: u32,
}

impl<'a> Frame<'a> {
    pub fn new(
        arena: &'a Bump,
        used_callee_saved: RegBitSet,
        spill_slots: u32,
        cells: u32,
        outgoing_words: u32,
    ) -> Self {
        let mut saved_registers = BumpVec::new_in(arena);
        saved_registers.extend(used_callee_saved.iter());
        Self {
            saved_registers,
            spill_slots,
            cells,
            outgoing_words,
        }
    }

    /// Lay out the frame of `func` for a target with `arg_reg_count`
    /// register arguments.
    pub fn layout(
        arena: &'a Bump,
        func: &Function,
        used_callee_saved: RegBitSet,
        spill_slots: u32,
        arg_reg_count: usize,
    ) -> Self {
        let insts = func.blocks.iter().flat_map(|b| &b.insts);
        let cells = insts.clone().filter(|i| matches!(i, Inst::Alloc { .. })).count() as u32;
        let outgoing = insts
            .map(|i| machine_arg_count(i).saturating_sub(arg_reg_count))
            .max()
            .unwrap_or(0) as u32;
        Self::new(arena, used_callee_saved, spill_slots, cells, outgoing)
    }

    pub fn save_word(&self, index: usize) -> u32 {
        index as u32
    }

    pub fn spill_word(&self, slot: u32) -> u32 {
        self.saved_registers.len() as u32 + slot
    }

    pub fn cell_word(&self, cell: u32) -> u32 {
        self.saved_registers.len() as u32 + self.spill_slots + cell
    }

    pub fn word_count(&self) -> u32 {
        self.saved_registers.len() as u32 + self.spill_slots + self.cells
    }

    /// Bytes reserved below the frame record, 16-byte aligned.
    pub fn size(&self) -> u32 {
        (8 * (self.word_count() + self.outgoing_words)).div_ceil(16) * 16
    }

    /// Offset of `word` from the stack pointer once the frame is set up, for
    /// targets that address words upwards from `sp`.
    pub fn sp_offset(&self, word: u32) -> i64 {
        8 * (self.outgoing_words as i64 + word as i64)
    }

    /// Offset of `word` below the frame pointer, for targets whose frame
    /// pointer sits directly above the words.
    pub fn fp_offset(&self, word: u32) -> i64 {
        -8 * (word as i64 + 1)
    }
}

/// Arguments the machine call for `inst` passes, runtime calls included.
pub fn machine_arg_count(inst: &Inst) -> usize {
    match inst {
        Inst::Call { args, .. } => args.len(),
        Inst::MethodCall { args, .. } | Inst::ClosureCall { args, .. } => args.len() + 1,
        Inst::AllocObject { .. } | Inst::MakeClosure { .. } => 1,
        Inst::GetItem { .. } => 2,
        Inst::SetItem { .. } => 3,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, Terminator, Type, Value};

    #[test]
    fn test_word_numbering_and_alignment() {
        let arena = Bump::new();
        let saved = RegBitSet::from_regs(&[AsmReg::gp(3), AsmReg::gp(12)]);
        let frame = Frame::new(&arena, saved, 3, 1, 0);
        assert_eq!(&frame.saved_registers[..], &[AsmReg::gp(3), AsmReg::gp(12)]);
        assert_eq!(frame.spill_word(0), 2);
        assert_eq!(frame.cell_word(0), 5);
        assert_eq!(frame.word_count(), 6);
        assert_eq!(frame.size(), 48);

        let odd = Frame::new(&arena, RegBitSet::new(), 1, 0, 0);
        assert_eq!(odd.size(), 16);
        let empty = Frame::new(&arena, RegBitSet::new(), 0, 0, 0);
        assert_eq!(empty.size(), 0);
    }

    #[test]
    fn test_outgoing_area_sits_below_words() {
        let arena = Bump::new();
        let mut func = Function::new("f", vec![], Type::Int);
        let cell = func.new_temp(Type::Ptr);
        let out = func.new_temp(Type::Int);
        let mut entry = Block::new("entry", Terminator::Return(Some(out.clone())));
        entry.insts.push(Inst::Alloc { dest: cell });
        entry.insts.push(Inst::Call {
            dest: out,
            func: "g".to_string(),
            args: (0..9).map(Value::int).collect(),
        });
        func.blocks.push(entry);

        let frame = Frame::layout(&arena, &func, RegBitSet::new(), 1, 6);
        assert_eq!(frame.cells, 1);
        assert_eq!(frame.outgoing_words, 3);
        assert_eq!(frame.sp_offset(0), 24);
        assert_eq!(frame.size(), 48);
        assert_eq!(frame.fp_offset(1), -16);
    }
}
