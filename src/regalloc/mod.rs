// Register allocation runs once per function after optimization and never
// fails. Instructions are numbered in layout order, live ranges are derived
// from block liveness, every range that spans a call is cut at the call sites
// inside it, and a linear scan hands out registers from the target's pool.
// Segments that must survive a call only ever receive callee-saved registers
// or a spill slot; everything else prefers caller-saved registers. The code
// generators query the result by value and position.

//! Linear-scan register allocation with call-boundary splitting.

pub mod config;
pub mod linear_scan;
pub mod liveness;

pub use config::RegConfig;
pub use linear_scan::{linear_scan, split_at_calls, Allocation, Interval, Location};
pub use liveness::{live_ranges, LiveRange, Liveness, Numbering};

use crate::ir::Function;

/// Allocate registers for `func` with the register classes of `config`.
pub fn allocate(func: &Function, config: &RegConfig) -> Allocation {
    let numbering = Numbering::compute(func);
    let liveness = Liveness::compute(func);
    let ranges = live_ranges(func, &numbering, &liveness);
    let intervals = split_at_calls(&ranges, &numbering.call_sites);
    let (intervals, spill_count) = linear_scan(intervals, config);
    let allocation = Allocation::new(intervals, spill_count, numbering.call_sites, config);

    log::debug!(
        "Allocated {}: {} values, {} intervals in registers, {} spilled, {} call sites",
        func.name,
        ranges.len(),
        allocation.register_count(),
        allocation.spilled_count(),
        allocation.call_sites.len()
    );
    allocation
}
