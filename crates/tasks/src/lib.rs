//! Generic render-task scheduling: three priority FIFOs drained each frame
//! while a share of the frame budget remains.
//!
//! # Invariants
//! - HIGH drains before NORMAL, NORMAL before LOW; FIFO within a priority.
//! - The budget is checked before every task; a running task is never interrupted.
//! - A failing or panicking task is counted and logged, never propagated.

pub mod scheduler;
pub mod task;

pub use scheduler::{DEFAULT_FRAME_BUDGET, STATS_INTERVAL, TaskCounters, TaskScheduler};
pub use task::{FnTask, Priority, RenderTask, STALE_AFTER, TaskError};

pub fn crate_info() -> &'static str {
    "framekeeper-tasks v0.1.0"
}
