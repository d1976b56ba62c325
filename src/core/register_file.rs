//! Physical register identifiers and register sets.
//!
//! Registers are identified by a bank and the architecture's hardware number
//! within that bank. Every IR value is one 64-bit word, so the allocator only
//! hands out general-purpose registers; the bank dimension keeps the set type
//! ready for a floating-point class.

use std::fmt;

/// Number of register banks a [`RegBitSet`] tracks.
pub const MAX_REGISTER_BANKS: usize = 2;

pub type RegBank = u8;

pub type RegId = u8;

/// General-purpose register bank.
pub const GP_BANK: RegBank = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsmReg {
    pub bank: RegBank,
    pub id: RegId,
}

impl AsmReg {
    pub const fn new(bank: RegBank, id: RegId) -> Self {
        Self { bank, id }
    }

    /// General-purpose register with the architecture's hardware number.
    pub const fn gp(id: RegId) -> Self {
        Self { bank: GP_BANK, id }
    }
}

impl fmt::Display for AsmReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}:{}", self.bank, self.id)
    }
}

/// Register class as one 64-bit mask per bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegBitSet {
    banks: [u64; MAX_REGISTER_BANKS],
}

impl RegBitSet {
    pub const fn new() -> Self {
        Self {
            banks: [0; MAX_REGISTER_BANKS],
        }
    }

    pub fn from_regs(regs: &[AsmReg]) -> Self {
        let mut set = Self::new();
        for &reg in regs {
            set.set(reg);
        }
        set
    }

    fn slot(reg: AsmReg) -> Option<(usize, u64)> {
        ((reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64)
            .then(|| (reg.bank as usize, 1u64 << reg.id))
    }

    pub fn contains(&self, reg: AsmReg) -> bool {
        Self::slot(reg).is_some_and(|(bank, bit)| self.banks[bank] & bit != 0)
    }

    pub fn set(&mut self, reg: AsmReg) {
        if let Some((bank, bit)) = Self::slot(reg) {
            self.banks[bank] |= bit;
        }
    }

    pub fn clear(&mut self, reg: AsmReg) {
        if let Some((bank, bit)) = Self::slot(reg) {
            self.banks[bank] &= !bit;
        }
    }

    pub fn union(&mut self, other: &RegBitSet) {
        for (mine, theirs) in self.banks.iter_mut().zip(other.banks) {
            *mine |= theirs;
        }
    }

    pub fn intersect(&mut self, other: &RegBitSet) {
        for (mine, theirs) in self.banks.iter_mut().zip(other.banks) {
            *mine &= theirs;
        }
    }

    /// Registers in the set across all banks.
    pub fn len(&self) -> u32 {
        self.banks.iter().map(|mask| mask.count_ones()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.iter().all(|&b| b == 0)
    }

    /// Registers in ascending (bank, id) order. Allocation picks the first,
    /// so the order decides which register a free choice lands on.
    pub fn iter(&self) -> impl Iterator<Item = AsmReg> + '_ {
        (0..MAX_REGISTER_BANKS).flat_map(move |bank| {
            let mask = self.banks[bank];
            (0..64u8)
                .filter(move |id| mask & (1u64 << id) != 0)
                .map(move |id| AsmReg::new(bank as RegBank, id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear() {
        let mut set = RegBitSet::new();
        let r3 = AsmReg::gp(3);
        let r12 = AsmReg::gp(12);

        assert!(!set.contains(r3));
        set.set(r3);
        set.set(r12);
        assert!(set.contains(r3));
        assert_eq!(set.len(), 2);

        set.clear(r3);
        assert!(!set.contains(r3));
        assert!(set.contains(r12));
        assert!(!set.contains(AsmReg::new(7, 3)));
    }

    #[test]
    fn test_iter_is_ascending() {
        let set = RegBitSet::from_regs(&[AsmReg::gp(31), AsmReg::gp(1), AsmReg::gp(9)]);
        let ids: Vec<u8> = set.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 9, 31]);
    }

    #[test]
    fn test_union_and_intersect() {
        let mut a = RegBitSet::from_regs(&[AsmReg::gp(1), AsmReg::gp(2)]);
        let b = RegBitSet::from_regs(&[AsmReg::gp(2), AsmReg::gp(3)]);

        let mut both = a;
        both.intersect(&b);
        assert_eq!(both.iter().collect::<Vec<_>>(), vec![AsmReg::gp(2)]);

        a.union(&b);
        assert_eq!(a.len(), 3);
        assert!(RegBitSet::new().is_empty());
    }
}
