use std::collections::BTreeMap;

use framekeeper_common::{ChunkId, QosConfig};
use glam::DVec3;

use crate::budget::QosSnapshot;

/// A particle spawn request as seen by the admission gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleSpawn<'a> {
    pub particle_id: &'a str,
    pub position: DVec3,
    /// Uniform sample in `[0, 1)` used for distance thinning.
    pub roll: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Disabled,
    Filtered,
    LongFrame,
    Unloaded,
    TileBudget,
    Thinned,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// Spawn it, with its size multiplied by `size_scale`.
    Admitted { size_scale: f64 },
    Rejected(Rejection),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Per-tick admission control for particle spawns.
///
/// Tile counters live for one tick; call [`ParticleGate::end_tick`] after each.
pub struct ParticleGate {
    config: QosConfig,
    tile_counts: BTreeMap<(i32, i32), u32>,
    admitted: u64,
    rejected: u64,
}

impl ParticleGate {
    pub fn new(config: QosConfig) -> Self {
        Self {
            config,
            tile_counts: BTreeMap::new(),
            admitted: 0,
            rejected: 0,
        }
    }

    pub fn set_config(&mut self, config: QosConfig) {
        self.config = config;
    }

    /// Decide whether `spawn` may proceed.
    ///
    /// `observer` is the (possibly predicted) camera position; distance
    /// thinning is skipped without one.
    pub fn admit(
        &mut self,
        spawn: &ParticleSpawn<'_>,
        observer: Option<DVec3>,
        qos: &QosSnapshot,
        is_loaded: impl FnOnce(ChunkId) -> bool,
    ) -> Admission {
        let decision = self.decide(spawn, observer, qos, is_loaded);
        match decision {
            Admission::Admitted { .. } => self.admitted += 1,
            Admission::Rejected(reason) => {
                self.rejected += 1;
                tracing::trace!(?reason, id = spawn.particle_id, "particle rejected");
            }
        }
        decision
    }

    fn decide(
        &mut self,
        spawn: &ParticleSpawn<'_>,
        observer: Option<DVec3>,
        qos: &QosSnapshot,
        is_loaded: impl FnOnce(ChunkId) -> bool,
    ) -> Admission {
        if self.config.disable_all_particles {
            return Admission::Rejected(Rejection::Disabled);
        }
        if self.config.disabled_particle_ids.contains(spawn.particle_id) {
            return Admission::Rejected(Rejection::Filtered);
        }
        if self.config.enable_micro_stutter_guard && qos.long_frame {
            return Admission::Rejected(Rejection::LongFrame);
        }
        if !is_loaded(ChunkId::containing(spawn.position.floor().as_ivec3())) {
            return Admission::Rejected(Rejection::Unloaded);
        }
        if self.config.enable_particle_tile_budget && !self.take_tile_slot(spawn.position, qos) {
            return Admission::Rejected(Rejection::TileBudget);
        }

        let mut size_scale = 1.0;
        if let (true, Some(observer)) = (self.config.particle_distance_scaling, observer) {
            let t = self.distance_fraction(observer.distance(spawn.position));
            let min_density = self.config.particle_min_density.clamp(0.0, 1.0);
            let density = lerp(1.0, min_density, t);
            if spawn.roll > density {
                return Admission::Rejected(Rejection::Thinned);
            }
            size_scale = lerp(1.0, self.config.particle_far_size_scale.max(0.1), t);
        }
        Admission::Admitted { size_scale }
    }

    fn take_tile_slot(&mut self, position: DVec3, qos: &QosSnapshot) -> bool {
        let tile = tile_of(position, self.config.particle_tile_size);
        let base = f64::from(self.config.particle_tile_budget.max(1));
        let budget = ((base * qos.particle_budget_scale).floor() as u32).max(1);
        let used = self.tile_counts.entry(tile).or_insert(0);
        if *used >= budget {
            return false;
        }
        *used += 1;
        true
    }

    /// Position of `distance` between the near and far thinning planes, in `[0, 1]`.
    fn distance_fraction(&self, distance: f64) -> f64 {
        let near = self.config.particle_near.max(0.0);
        let far = self.config.particle_far.max(near + 1.0);
        ((distance - near) / (far - near)).clamp(0.0, 1.0)
    }

    pub fn end_tick(&mut self) {
        self.tile_counts.clear();
        self.admitted = 0;
        self.rejected = 0;
    }

    pub fn admitted_this_tick(&self) -> u64 {
        self.admitted
    }

    pub fn rejected_this_tick(&self) -> u64 {
        self.rejected
    }
}

/// World-space XZ tile containing `position`.
pub fn tile_of(position: DVec3, tile_size: u32) -> (i32, i32) {
    let size = f64::from(tile_size.max(4));
    (
        (position.x / size).floor() as i32,
        (position.z / size).floor() as i32,
    )
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
