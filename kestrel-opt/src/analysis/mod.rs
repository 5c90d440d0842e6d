//! Graph analyses consumed by the optimization passes.
//!
//! Analyses are built on demand from an immutable graph and owned by the
//! pass that requested them; a pass that mutates the CFG rebuilds what it
//! needs instead of patching stale results.

mod alias;
mod bounds;
mod domtree;
mod linear_order;
mod liveness;
mod loops;
mod monitor;
mod rpo;
mod save_state_bridges;

pub use alias::{alias_class, may_alias, AliasClass};
pub use bounds::{find_countable_loop, BoundsAnalysis, CountableLoop, Range};
pub use domtree::DomTree;
pub use linear_order::compute_linear_order;
pub use liveness::Liveness;
pub use loops::{LoopId, LoopInfo, LoopTree};
pub use monitor::MonitorAnalysis;
pub use rpo::compute_rpo;
pub use save_state_bridges::SaveStateBridges;
