//! Shared vocabulary for the framekeeper scheduler: chunk/slice/region keys,
//! observer pose, configuration, clock and host traits.
//!
//! # Invariants
//! - All keys are plain value types with structural equality and total order.
//! - Configuration is read-only to every scheduler component.

pub mod clock;
pub mod config;
pub mod host;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock, system_clock};
pub use config::{ConfigError, QosConfig};
pub use host::{RebuildSink, WorldHost};
pub use types::{
    Aabb, CHUNK_SIZE, ChunkId, ObserverPose, REGION_SIZE, RegionOrigin, SLICES_PER_CHUNK, SliceKey,
};

pub fn crate_info() -> &'static str {
    "framekeeper-common v0.1.0"
}
