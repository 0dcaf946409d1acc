//! Runtime facade: one owned instance of every framekeeper component, built
//! from a shared configuration and clock, sequenced per frame and per tick.
//!
//! # Invariants
//! - Within a tick the predictor is updated before dirty regions are flushed.
//! - The frame-time controller samples before any multiplier is read that frame.
//! - World reset clears scheduler state, queued tasks and culling hysteresis together.

mod runtime;

#[cfg(test)]
mod frame_loop;

pub use runtime::QosRuntime;

pub fn crate_info() -> &'static str {
    "framekeeper-runtime v0.1.0"
}
