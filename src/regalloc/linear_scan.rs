//! Call splitting and the linear-scan assignment itself.

use std::fmt;

use hashbrown::HashMap;

use crate::core::{AsmReg, RegBitSet};
use crate::ir::ValueKey;

use super::config::RegConfig;
use super::liveness::LiveRange;

/// Where a value lives for the duration of one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Reg(AsmReg),
    /// Index of an 8-byte spill slot.
    Spill(u32),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Reg(reg) => write!(f, "{}", reg),
            Location::Spill(slot) => write!(f, "spill{}", slot),
        }
    }
}

/// A live segment of one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub key: ValueKey,
    pub start: u32,
    pub end: u32,
    pub location: Option<Location>,
    /// Begins at a call site; its value must survive the call.
    pub crosses_call: bool,
    /// Index of the first segment when this one was produced by splitting.
    pub parent: Option<usize>,
}

impl Interval {
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Whether the two intervals may not share a location. Segments that only
    /// meet at a call site hand over there: the split moves at the call are
    /// resolved as one parallel set, so the register is free to change owner.
    pub fn conflicts_with(&self, other: &Interval, call_sites: &[u32]) -> bool {
        if !self.overlaps(other) {
            return false;
        }
        let meeting = if self.end == other.start {
            Some(self.end)
        } else if other.end == self.start {
            Some(other.end)
        } else {
            None
        };
        !meeting.is_some_and(|pos| call_sites.binary_search(&pos).is_ok())
    }
}

/// Split every range at the call sites strictly inside it. `call_sites` must
/// be ascending.
pub fn split_at_calls(ranges: &[LiveRange], call_sites: &[u32]) -> Vec<Interval> {
    let mut intervals = Vec::with_capacity(ranges.len());
    for range in ranges {
        let first = intervals.len();
        let mut start = range.start;
        let inner = call_sites
            .iter()
            .copied()
            .filter(|&c| range.start < c && c < range.end);
        for call in inner {
            intervals.push(Interval {
                key: range.key,
                start,
                end: call,
                location: None,
                crosses_call: start != range.start,
                parent: (start != range.start).then_some(first),
            });
            start = call;
        }
        intervals.push(Interval {
            key: range.key,
            start,
            end: range.end,
            location: None,
            crosses_call: start != range.start,
            parent: (start != range.start).then_some(first),
        });
    }
    intervals
}

struct Scan<'a> {
    config: &'a RegConfig,
    intervals: Vec<Interval>,
    active: Vec<usize>,
    free: RegBitSet,
    next_slot: u32,
}

impl Scan<'_> {
    fn spill(&mut self, index: usize) {
        self.intervals[index].location = Some(Location::Spill(self.next_slot));
        self.next_slot += 1;
    }

    fn assign(&mut self, index: usize, reg: AsmReg) {
        self.free.clear(reg);
        self.intervals[index].location = Some(Location::Reg(reg));
        self.active.push(index);
    }

    fn first_free(&self, class: RegBitSet) -> Option<AsmReg> {
        let mut candidates = class;
        candidates.intersect(&self.free);
        let first = candidates.iter().next();
        first
    }

    fn expire(&mut self, position: u32) {
        let intervals = &self.intervals;
        let free = &mut self.free;
        self.active.retain(|&i| {
            if intervals[i].end >= position {
                return true;
            }
            if let Some(Location::Reg(reg)) = intervals[i].location {
                free.set(reg);
            }
            false
        });
    }

    /// Active interval with the latest end among those whose register
    /// satisfies `eligible`.
    fn latest_active(&self, eligible: impl Fn(AsmReg) -> bool) -> Option<(usize, AsmReg)> {
        self.active
            .iter()
            .filter_map(|&i| match self.intervals[i].location {
                Some(Location::Reg(reg)) if eligible(reg) => Some((i, reg)),
                _ => None,
            })
            .max_by_key(|&(i, _)| (self.intervals[i].end, std::cmp::Reverse(i)))
    }

    /// Give `victim`'s register to `index` and spill the victim.
    fn steal(&mut self, index: usize, victim: usize, reg: AsmReg) {
        self.active.retain(|&i| i != victim);
        self.spill(victim);
        self.assign(index, reg);
    }

    fn allocate_crossing(&mut self, index: usize) {
        let callee_saved = self.config.allocatable_callee_saved();

        // Continue in the previous segment's callee-saved register.
        let previous = self.active.iter().copied().find(|&i| {
            let (prev, cur) = (&self.intervals[i], &self.intervals[index]);
            prev.key == cur.key && prev.end == cur.start
        });
        if let Some(prev) = previous {
            if let Some(Location::Reg(reg)) = self.intervals[prev].location {
                if self.config.is_callee_saved(reg) {
                    self.active.retain(|&i| i != prev);
                    self.intervals[index].location = Some(Location::Reg(reg));
                    self.active.push(index);
                    return;
                }
            }
        }

        if let Some(reg) = self.first_free(callee_saved) {
            self.assign(index, reg);
            return;
        }

        let end = self.intervals[index].end;
        let config = self.config;
        match self.latest_active(|reg| config.is_callee_saved(reg)) {
            Some((victim, reg)) if self.intervals[victim].end > end => self.steal(index, victim, reg),
            _ => self.spill(index),
        }
    }

    fn allocate_plain(&mut self, index: usize) {
        let caller_saved = self.config.allocatable_caller_saved();
        let callee_saved = self.config.allocatable_callee_saved();
        if let Some(reg) = self
            .first_free(caller_saved)
            .or_else(|| self.first_free(callee_saved))
        {
            self.assign(index, reg);
            return;
        }

        let end = self.intervals[index].end;
        match self.latest_active(|_| true) {
            Some((victim, reg)) if self.intervals[victim].end > end => self.steal(index, victim, reg),
            _ => self.spill(index),
        }
    }
}

/// Assign a location to every interval. Returns the intervals with their
/// locations filled in, in the order given, and the number of spill slots
/// used. Never fails: anything that does not get a register is spilled.
pub fn linear_scan(intervals: Vec<Interval>, config: &RegConfig) -> (Vec<Interval>, u32) {
    let mut order: Vec<usize> = (0..intervals.len()).collect();
    order.sort_by_key(|&i| (intervals[i].start, intervals[i].crosses_call, i));

    let mut scan = Scan {
        config,
        intervals,
        active: Vec::new(),
        free: config.available,
        next_slot: 0,
    };

    for index in order {
        scan.expire(scan.intervals[index].start);
        if scan.intervals[index].crosses_call {
            scan.allocate_crossing(index);
        } else {
            scan.allocate_plain(index);
        }
    }

    (scan.intervals, scan.next_slot)
}

/// Result of allocating one function.
#[derive(Debug, Clone, Default)]
pub struct Allocation {
    pub intervals: Vec<Interval>,
    /// Interval indices of every value, ordered by start.
    pub segments: HashMap<ValueKey, Vec<usize>>,
    /// Register of each value's first segment, when it has one.
    pub registers: HashMap<ValueKey, AsmReg>,
    /// Spill slot of each value that is spilled in some segment.
    pub spill_slots: HashMap<ValueKey, u32>,
    pub used_callee_saved: RegBitSet,
    pub spill_count: u32,
    pub call_sites: Vec<u32>,
}

impl Allocation {
    pub fn new(intervals: Vec<Interval>, spill_count: u32, call_sites: Vec<u32>, config: &RegConfig) -> Self {
        let mut segments: HashMap<ValueKey, Vec<usize>> = HashMap::new();
        let mut registers = HashMap::new();
        let mut spill_slots = HashMap::new();
        let mut used_callee_saved = RegBitSet::new();

        for (i, interval) in intervals.iter().enumerate() {
            segments.entry(interval.key).or_default().push(i);
            match interval.location {
                Some(Location::Reg(reg)) => {
                    if config.is_callee_saved(reg) {
                        used_callee_saved.set(reg);
                    }
                }
                Some(Location::Spill(slot)) => {
                    spill_slots.entry(interval.key).or_insert(slot);
                }
                None => {}
            }
        }
        for list in segments.values_mut() {
            list.sort_by_key(|&i| intervals[i].start);
        }
        for (key, list) in &segments {
            if let Some(Location::Reg(reg)) = list.first().and_then(|&i| intervals[i].location) {
                registers.insert(*key, reg);
            }
        }

        Self {
            intervals,
            segments,
            registers,
            spill_slots,
            used_callee_saved,
            spill_count,
            call_sites,
        }
    }

    /// Location of `key` at `pos`. At a split point the continuation wins.
    pub fn location_at(&self, key: ValueKey, pos: u32) -> Option<Location> {
        self.segments
            .get(&key)?
            .iter()
            .rev()
            .map(|&i| &self.intervals[i])
            .find(|seg| seg.start <= pos && pos <= seg.end)
            .and_then(|seg| seg.location)
    }

    /// Location of `key` on entry to `pos`, before any split at `pos` takes
    /// effect.
    pub fn location_entering(&self, key: ValueKey, pos: u32) -> Option<Location> {
        self.segments
            .get(&key)?
            .iter()
            .map(|&i| &self.intervals[i])
            .find(|seg| seg.start <= pos && pos <= seg.end)
            .and_then(|seg| seg.location)
    }

    /// Location a value is defined into: its first segment.
    pub fn def_location(&self, key: ValueKey) -> Option<Location> {
        self.segments
            .get(&key)?
            .first()
            .and_then(|&i| self.intervals[i].location)
    }

    /// `(from, to)` moves that carry values into their post-call segments at
    /// the call at `pos`.
    pub fn split_moves_at(&self, pos: u32) -> Vec<(Location, Location)> {
        let mut moves = Vec::new();
        let mut keys: Vec<&ValueKey> = self.segments.keys().collect();
        keys.sort();
        for key in keys {
            let list = &self.segments[key];
            for pair in list.windows(2) {
                let (before, after) = (&self.intervals[pair[0]], &self.intervals[pair[1]]);
                if before.end != pos || after.start != pos {
                    continue;
                }
                if let (Some(from), Some(to)) = (before.location, after.location) {
                    if from != to {
                        moves.push((from, to));
                    }
                }
            }
        }
        moves
    }

    pub fn register_count(&self) -> usize {
        self.intervals
            .iter()
            .filter(|i| matches!(i.location, Some(Location::Reg(_))))
            .count()
    }

    pub fn spilled_count(&self) -> usize {
        self.intervals
            .iter()
            .filter(|i| matches!(i.location, Some(Location::Spill(_))))
            .count()
    }

    /// Bytes of stack the spill slots need.
    pub fn stack_size(&self) -> u32 {
        self.spill_count * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(caller: u8, callee: u8) -> RegConfig {
        let caller_regs: Vec<AsmReg> = (0..caller).map(AsmReg::gp).collect();
        let callee_regs: Vec<AsmReg> = (10..10 + callee).map(AsmReg::gp).collect();
        let all: Vec<AsmReg> = caller_regs.iter().chain(&callee_regs).copied().collect();
        RegConfig::new(&all, &[], &callee_regs, &caller_regs)
    }

    fn range(id: u32, start: u32, end: u32) -> LiveRange {
        LiveRange {
            key: ValueKey::Temp(id),
            start,
            end,
        }
    }

    #[test]
    fn test_split_at_calls() {
        let intervals = split_at_calls(&[range(0, 2, 20), range(1, 6, 10)], &[6, 10, 14]);
        let spans: Vec<(u32, u32, bool, Option<usize>)> = intervals
            .iter()
            .map(|i| (i.start, i.end, i.crosses_call, i.parent))
            .collect();
        assert_eq!(
            spans,
            vec![
                (2, 6, false, None),
                (6, 10, true, Some(0)),
                (10, 14, true, Some(0)),
                (14, 20, true, Some(0)),
                // Calls at the ends of a range do not split it.
                (6, 10, false, None),
            ]
        );
    }

    #[test]
    fn test_no_overlapping_register_sharing() {
        let ranges: Vec<LiveRange> = (0..12).map(|i| range(i, 2 * i, 2 * i + 9)).collect();
        let (intervals, _) = linear_scan(split_at_calls(&ranges, &[]), &config(2, 2));
        for (i, a) in intervals.iter().enumerate() {
            for b in &intervals[i + 1..] {
                if a.overlaps(b) {
                    if let (Some(Location::Reg(x)), Some(Location::Reg(y))) = (a.location, b.location) {
                        assert_ne!(x, y, "{:?} and {:?} share a register", a, b);
                    }
                }
            }
        }
        assert!(intervals.iter().all(|i| i.location.is_some()));
    }

    #[test]
    fn test_handoff_at_call_site_is_not_a_conflict() {
        let segment = |start, end| Interval {
            key: ValueKey::Temp(start),
            start,
            end,
            location: Some(Location::Reg(AsmReg::gp(15))),
            crosses_call: start == 38,
            parent: None,
        };
        let ending = segment(32, 38);
        let continuation = segment(38, 42);
        assert!(ending.overlaps(&continuation));
        assert!(!ending.conflicts_with(&continuation, &[20, 38]));
        assert!(!continuation.conflicts_with(&ending, &[38]));
        assert!(ending.conflicts_with(&continuation, &[20, 40]));
        assert!(segment(30, 40).conflicts_with(&continuation, &[38]));
    }

    #[test]
    fn test_spill_slots_are_distinct() {
        let ranges: Vec<LiveRange> = (0..8).map(|i| range(i, 2, 40)).collect();
        let (intervals, slots) = linear_scan(split_at_calls(&ranges, &[]), &config(1, 1));
        let spilled: Vec<u32> = intervals
            .iter()
            .filter_map(|i| match i.location {
                Some(Location::Spill(slot)) => Some(slot),
                _ => None,
            })
            .collect();
        assert_eq!(spilled.len(), 6);
        assert_eq!(slots, 6);
        let mut unique = spilled.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), spilled.len());
    }

    #[test]
    fn test_crossing_segment_avoids_caller_saved() {
        let cfg = config(3, 1);
        let ranges = vec![range(0, 2, 30), range(1, 4, 30), range(2, 6, 8)];
        let (intervals, _) = linear_scan(split_at_calls(&ranges, &[10]), &cfg);
        for interval in intervals.iter().filter(|i| i.crosses_call) {
            match interval.location {
                Some(Location::Reg(reg)) => assert!(cfg.is_callee_saved(reg)),
                Some(Location::Spill(_)) => {}
                None => panic!("unallocated segment"),
            }
        }
        // Only one callee-saved register exists, so one of the two crossing
        // segments lives on the stack.
        assert_eq!(
            intervals
                .iter()
                .filter(|i| i.crosses_call && matches!(i.location, Some(Location::Spill(_))))
                .count(),
            1
        );
    }

    #[test]
    fn test_location_at_prefers_continuation() {
        let cfg = config(2, 2);
        let ranges = vec![range(0, 2, 20)];
        let (intervals, slots) = linear_scan(split_at_calls(&ranges, &[10]), &cfg);
        let alloc = Allocation::new(intervals, slots, vec![10], &cfg);
        let first = alloc.location_at(ValueKey::Temp(0), 4);
        let at_call = alloc.location_at(ValueKey::Temp(0), 10);
        let Some(Location::Reg(reg)) = at_call else {
            panic!("expected register");
        };
        assert!(cfg.is_callee_saved(reg));
        assert_ne!(first, at_call);
        assert_eq!(alloc.split_moves_at(10), vec![(first.expect("first"), at_call.expect("call"))]);
        assert_eq!(alloc.def_location(ValueKey::Temp(0)), first);
        assert_eq!(alloc.location_entering(ValueKey::Temp(0), 10), first);
        assert!(alloc.used_callee_saved.contains(reg));
    }
}
