//! Per-target register classes.

use crate::core::{AsmReg, RegBitSet};

/// Register sets the allocator works with. Built once per target and never
/// modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegConfig {
    /// Registers the allocator may hand out.
    pub available: RegBitSet,
    /// Registers never handed out (stack/frame pointers, scratch, arguments).
    pub reserved: RegBitSet,
    /// Preserved across calls by the callee.
    pub callee_saved: RegBitSet,
    /// Clobbered by every call.
    pub caller_saved: RegBitSet,
}

impl RegConfig {
    /// `available` is trimmed by `reserved`.
    pub fn new(
        available: &[AsmReg],
        reserved: &[AsmReg],
        callee_saved: &[AsmReg],
        caller_saved: &[AsmReg],
    ) -> Self {
        let reserved = RegBitSet::from_regs(reserved);
        let mut available = RegBitSet::from_regs(available);
        for reg in reserved.iter() {
            available.clear(reg);
        }
        Self {
            available,
            reserved,
            callee_saved: RegBitSet::from_regs(callee_saved),
            caller_saved: RegBitSet::from_regs(caller_saved),
        }
    }

    /// Allocatable registers preserved across calls.
    pub fn allocatable_callee_saved(&self) -> RegBitSet {
        let mut set = self.available;
        set.intersect(&self.callee_saved);
        set
    }

    /// Allocatable registers clobbered by calls.
    pub fn allocatable_caller_saved(&self) -> RegBitSet {
        let mut set = self.available;
        set.intersect(&self.caller_saved);
        set
    }

    pub fn is_callee_saved(&self, reg: AsmReg) -> bool {
        self.callee_saved.contains(reg)
    }

    pub fn is_allocatable(&self, reg: AsmReg) -> bool {
        self.available.contains(reg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_registers_are_not_allocatable() {
        let regs: Vec<AsmReg> = (0..6).map(AsmReg::gp).collect();
        let config = RegConfig::new(&regs, &regs[..1], &regs[3..], &regs[..3]);
        assert!(!config.is_allocatable(AsmReg::gp(0)));
        assert_eq!(config.allocatable_caller_saved().len(), 2);
        assert_eq!(config.allocatable_callee_saved().len(), 3);
        assert!(config.is_callee_saved(AsmReg::gp(4)));
    }
}
