use crate::types::{ChunkId, ObserverPose, RegionOrigin};

/// Receives region rebuild commands emitted by the scheduler.
///
/// Implementations must tolerate duplicate commands for the same origin.
pub trait RebuildSink {
    fn schedule_region_rebuild(&mut self, origin: RegionOrigin, force_next_frame: bool);
}

/// Collects emitted origins in order. Handy for tools and tests.
impl RebuildSink for Vec<RegionOrigin> {
    fn schedule_region_rebuild(&mut self, origin: RegionOrigin, _force_next_frame: bool) {
        self.push(origin);
    }
}

/// Host renderer/world interface consumed by the runtime.
///
/// Queries are read-only; the only mutation flows through [`RebuildSink`].
pub trait WorldHost: RebuildSink {
    /// Current observer pose, or `None` when no camera/world is present.
    fn observer_pose(&self, tick_fraction: f32) -> Option<ObserverPose>;

    /// Whether the chunk column is loaded client-side.
    fn is_region_loaded(&self, chunk: ChunkId) -> bool;

    /// World time in ticks.
    fn tick_counter(&self) -> u64;

    /// The host frame limiter's target rate (0 = unlimited).
    fn target_fps(&self) -> u32;
}
