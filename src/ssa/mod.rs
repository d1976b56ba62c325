//! Control-flow graph and SSA construction.
//!
//! [`construct_ssa`] is the entry point used by the driver: it rebuilds the
//! CFG, drops unreachable blocks, computes the dominator tree with
//! [`DomTree`] and rewrites the function into strict SSA form.

pub mod cfg;
pub mod construct;
pub mod dominators;

pub use cfg::{build_cfg, label_index, reachable_blocks, remove_unreachable_blocks};
pub use construct::{construct_ssa, is_ssa, prune_dead_phis};
pub use dominators::DomTree;
