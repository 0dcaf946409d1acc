use std::collections::BTreeMap;

use framekeeper_common::{Aabb, QosConfig};
use glam::{DVec3, IVec3};

use crate::budget::QosSnapshot;
use crate::visibility::{BEHIND_ANGLE_DEGREES, CullThresholds, DEGENERATE_DISTANCE, should_cull};

/// Observer state the cullers read for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullView {
    pub eye: DVec3,
    /// Smoothed unit look direction.
    pub forward: DVec3,
    /// Smoothed speed in blocks per tick.
    pub speed: f64,
    pub pitch_degrees: f32,
}

/// Why a gate rejected a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullReason {
    VerticalBand,
    AngleDistance,
    LodThrottled,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Stable key for a box, from its center and size quantized to half blocks.
pub fn box_key(aabb: &Aabb) -> u64 {
    let c = aabb.center();
    let s = aabb.size();
    [c.x, c.y, c.z, s.x, s.y, s.z]
        .into_iter()
        .fold(FNV_OFFSET, |h, v| {
            (h ^ (v * 2.0).round() as i64 as u64).wrapping_mul(FNV_PRIME)
        })
}

/// Half-height of the section vertical band, widened by speed and pitch.
pub fn section_band_half_height(config: &QosConfig, speed: f64, pitch_degrees: f32) -> i32 {
    let mut half = config.vertical_band_half_height.max(1);
    if config.enable_dynamic_vertical_band {
        half = half.saturating_add(((speed * 12.0).round() as i32).min(6));
        let pitch = (f64::from(pitch_degrees.abs()) / 90.0 * 4.0).round() as i32;
        half = half.saturating_add(pitch.min(4));
    }
    half
}

/// Whether a rebuild or render of geometry at `target` should wait until the
/// observer faces it. Uses the unscaled speed thresholds and the far cutoff.
pub fn region_render_culled(view: &CullView, target: DVec3) -> bool {
    let t = CullThresholds::for_speed(view.speed);
    should_cull(
        view.eye,
        view.forward,
        target,
        t.front,
        t.behind,
        BEHIND_ANGLE_DEGREES,
    ) || view.eye.distance(target) > t.far
}

/// Per-frame render gate for section boxes.
pub struct SectionCuller {
    config: QosConfig,
    recent_visible: BTreeMap<u64, u64>,
    checked: u64,
    culled: u64,
}

impl SectionCuller {
    pub fn new(config: QosConfig) -> Self {
        Self {
            config,
            recent_visible: BTreeMap::new(),
            checked: 0,
            culled: 0,
        }
    }

    pub fn set_config(&mut self, config: QosConfig) {
        self.config = config;
    }

    /// Whether the host should render `aabb` this frame.
    pub fn is_visible(&mut self, view: Option<&CullView>, aabb: &Aabb, world_tick: u64) -> bool {
        if !self.config.enable_chunk_culling {
            return true;
        }
        let Some(view) = view else {
            return true;
        };
        self.checked += 1;

        match self.classify(view, aabb, world_tick) {
            Some(reason) => {
                self.culled += 1;
                tracing::trace!(?reason, center = ?aabb.center(), "section culled");
                false
            }
            None => true,
        }
    }

    fn classify(&mut self, view: &CullView, aabb: &Aabb, world_tick: u64) -> Option<CullReason> {
        if self.config.enable_chunk_vertical_band_culling {
            let half = section_band_half_height(&self.config, view.speed, view.pitch_degrees);
            let half = f64::from(half);
            if aabb.max.y < view.eye.y - half || aabb.min.y > view.eye.y + half {
                return Some(CullReason::VerticalBand);
            }
        }

        if (aabb.center() - view.eye).length() < DEGENERATE_DISTANCE {
            return None;
        }

        let behind = (32.0 - (view.speed * 24.0).min(16.0)).max(16.0);
        let far = 98.0 + (view.speed * 48.0).min(32.0);
        let key = box_key(aabb);
        // Front distance is bounded only by the far cutoff here.
        let culled = should_cull(
            view.eye,
            view.forward,
            aabb.center(),
            far,
            behind,
            BEHIND_ANGLE_DEGREES,
        );
        if culled {
            if self.seen_within_window(key, world_tick) {
                return None;
            }
            return Some(CullReason::AngleDistance);
        }

        self.recent_visible.insert(key, world_tick);
        None
    }

    fn seen_within_window(&self, key: u64, world_tick: u64) -> bool {
        let window = self.config.frustum_hysteresis_ticks;
        self.recent_visible
            .get(&key)
            .is_some_and(|&last| world_tick.saturating_sub(last) <= window)
    }

    /// Drop hysteresis entries that can no longer keep a box alive and reset counters.
    pub fn end_tick(&mut self, world_tick: u64) {
        let window = self.config.frustum_hysteresis_ticks;
        self.recent_visible
            .retain(|_, last| world_tick.saturating_sub(*last) <= window);
        self.checked = 0;
        self.culled = 0;
    }

    pub fn reset(&mut self) {
        self.recent_visible.clear();
        self.checked = 0;
        self.culled = 0;
    }

    pub fn checked_this_tick(&self) -> u64 {
        self.checked
    }

    pub fn culled_this_tick(&self) -> u64 {
        self.culled
    }

    pub fn hysteresis_entries(&self) -> usize {
        self.recent_visible.len()
    }
}

/// Per-entity render gate.
pub struct EntityCuller {
    config: QosConfig,
    culled: u64,
}

impl EntityCuller {
    pub fn new(config: QosConfig) -> Self {
        Self { config, culled: 0 }
    }

    pub fn set_config(&mut self, config: QosConfig) {
        self.config = config;
    }

    /// `None` means render the entity.
    pub fn check(
        &mut self,
        view: Option<&CullView>,
        entity: DVec3,
        qos: &QosSnapshot,
        world_tick: u64,
    ) -> Option<CullReason> {
        if !self.config.enable_entity_culling {
            return None;
        }
        let view = view?;
        let reason = classify_entity(&self.config, view, entity, qos, world_tick);
        if let Some(reason) = reason {
            self.culled += 1;
            tracing::trace!(?reason, ?entity, "entity culled");
        }
        reason
    }

    pub fn end_tick(&mut self) {
        self.culled = 0;
    }

    pub fn culled_this_tick(&self) -> u64 {
        self.culled
    }
}

/// Render gate for block entities (chests, signs, banners).
///
/// Shares the entity thresholds but is toggled on its own and targets the
/// block center.
pub struct BlockEntityCuller {
    config: QosConfig,
    culled: u64,
}

impl BlockEntityCuller {
    pub fn new(config: QosConfig) -> Self {
        Self { config, culled: 0 }
    }

    pub fn set_config(&mut self, config: QosConfig) {
        self.config = config;
    }

    /// `None` means render the block entity at `block`.
    pub fn check(
        &mut self,
        view: Option<&CullView>,
        block: IVec3,
        qos: &QosSnapshot,
        world_tick: u64,
    ) -> Option<CullReason> {
        if !self.config.enable_block_entity_culling {
            return None;
        }
        let view = view?;
        let center = block.as_dvec3() + DVec3::splat(0.5);
        let reason = classify_entity(&self.config, view, center, qos, world_tick);
        if let Some(reason) = reason {
            self.culled += 1;
            tracing::trace!(?reason, ?block, "block entity culled");
        }
        reason
    }

    pub fn end_tick(&mut self) {
        self.culled = 0;
    }

    pub fn culled_this_tick(&self) -> u64 {
        self.culled
    }
}

fn classify_entity(
    config: &QosConfig,
    view: &CullView,
    target: DVec3,
    qos: &QosSnapshot,
    world_tick: u64,
) -> Option<CullReason> {
    if config.enable_entity_vertical_band_culling {
        let half = f64::from(config.vertical_band_half_height.max(1));
        if (target.y - view.eye.y).abs() > half {
            return Some(CullReason::VerticalBand);
        }
    }

    let mut front = 64.0 + (view.speed * 96.0).min(48.0);
    let mut behind = (16.0 - (view.speed * 24.0).min(12.0)).max(8.0);
    let mut angle = BEHIND_ANGLE_DEGREES;
    if !config.enable_entity_behind_culling {
        behind = f64::INFINITY;
        angle = 180.0;
    }
    front *= qos.far_cutoff_multiplier;
    behind *= qos.far_cutoff_multiplier;
    if should_cull(view.eye, view.forward, target, front, behind, angle) {
        return Some(CullReason::AngleDistance);
    }

    let distance = (target - view.eye).length();
    if config.lod_throttling_enabled && lod_throttled(qos.lod_level, distance, world_tick) {
        return Some(CullReason::LodThrottled);
    }
    None
}

/// Far entities render on a reduced cadence that tightens with the LOD level.
fn lod_throttled(level: u8, distance: f64, world_tick: u64) -> bool {
    let (far_band, mid_band) = match level {
        0 => (48.0, 24.0),
        1 => (40.0, 20.0),
        _ => (32.0, 16.0),
    };
    if distance > far_band {
        let mask = if level >= 2 { 5 } else { 3 };
        world_tick & mask != 0
    } else if distance > mid_band {
        world_tick & 1 != 0
    } else {
        false
    }
}
