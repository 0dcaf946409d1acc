//! Frame-time QoS: the closed-loop budget controller, movement prediction,
//! the angle/distance visibility test and the per-frame render admission gates
//! (sections, entities, particles) built on them.
//!
//! # Invariants
//! - Every controller output is clamped to its documented range.
//! - Degenerate geometry (zero-length vectors, coincident points) never culls
//!   and never produces NaN.
//! - A missing observer leaves all learned state untouched.

pub mod budget;
pub mod culling;
pub mod particles;
pub mod predictor;
pub mod visibility;

pub use budget::{FrameBudgetController, FrameTimeWindow, QosSnapshot};
pub use culling::{
    BlockEntityCuller, CullReason, CullView, EntityCuller, SectionCuller, region_render_culled,
};
pub use particles::{Admission, ParticleGate, ParticleSpawn, Rejection};
pub use predictor::MovementPredictor;
pub use visibility::{CullThresholds, Visibility, classify, in_forward_cone, should_cull};

pub fn crate_info() -> &'static str {
    "framekeeper-qos v0.1.0"
}
