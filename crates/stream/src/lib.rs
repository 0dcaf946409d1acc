//! Dirty-region streaming: quadrant slice indexing and the scheduler that
//! turns block edits into budgeted, visibility-gated region rebuilds.
//!
//! # Invariants
//! - A slice with no pending origins never emits and is cleaned on the next flush.
//! - A region origin is pending at most once per slice; edits deduplicate by region.
//! - Unloading a chunk removes every key that references it.
//! - Flushing without an observer changes nothing, including the tick counter.

pub mod scheduler;
pub mod slicing;

pub use scheduler::{DirtyRegionScheduler, SchedulerStats, priority_score};
pub use slicing::{quadrant_center, representative_point, slice_index, slice_key, slices_of};

pub fn crate_info() -> &'static str {
    "framekeeper-stream v0.1.0"
}
