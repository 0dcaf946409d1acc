use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use framekeeper_common::{
    ChunkId, Clock, ObserverPose, QosConfig, RebuildSink, RegionOrigin, SLICES_PER_CHUNK, SliceKey,
    system_clock,
};
use framekeeper_qos::visibility::{
    BEHIND_ANGLE_DEGREES, CullThresholds, FORWARD_CONE_DEGREES, forward_dot, in_forward_cone,
    should_cull,
};
use framekeeper_qos::{MovementPredictor, QosSnapshot};
use glam::{DVec3, IVec3};

use crate::slicing::{representative_point, slice_key, slices_of};

/// Maximum extra forward-cone half-angle during fast turns, in degrees.
const TURN_WIDEN_DEGREES: f64 = 30.0;

/// Prefetch reaches this far beyond the far cutoff inside the forward cone.
const PREFETCH_FAR_SLACK: f64 = 1.15;

/// Height difference at which the vertical preference reaches zero.
const Y_FAVOR_RANGE: f64 = 24.0;

/// Per-slice pending region origins of one chunk.
type SlicePending = [BTreeSet<RegionOrigin>; SLICES_PER_CHUNK];

/// Outcome counters of the most recent flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub tick: u64,
    /// Rebuild commands emitted from candidates (or the full flush).
    pub flushed: usize,
    /// Rebuild commands emitted from the unhide queue.
    pub unhidden: usize,
    pub skipped_empty: usize,
    pub deferred: usize,
    pub debounced: usize,
    pub deprioritized: usize,
    pub slice_budget: usize,
    pub unhide_budget: usize,
    pub dirty_slices: usize,
    pub pending_unhide: usize,
}

/// Priority of a visible slice: nearer, more forward and closer in height is better.
pub fn priority_score(eye: DVec3, forward: DVec3, target: DVec3) -> f64 {
    let inv_dist = 1.0 / (1.0 + eye.distance(target));
    let forward_favor = forward_dot(eye, forward, target).max(0.0);
    let y_favor = (1.0 - (target.y - eye.y).abs() / Y_FAVOR_RANGE).max(0.0);
    inv_dist * (0.6 + 0.3 * forward_favor + 0.1 * y_favor)
}

/// Everything a flush derives once from the observer, predictor and controller.
struct FlushParams {
    eye: DVec3,
    forward: DVec3,
    thresholds: CullThresholds,
    cone_degrees: f64,
    slice_budget: usize,
    unhide_budget: usize,
}

impl FlushParams {
    fn new(
        pose: &ObserverPose,
        predictor: &MovementPredictor,
        qos: &QosSnapshot,
        config: &QosConfig,
    ) -> Self {
        let mut thresholds = CullThresholds::for_speed(predictor.smoothed_speed())
            .scaled(qos.far_cutoff_multiplier);

        let strength = config.turn_bias();
        let turn = (predictor.angular_acceleration().abs() * 6.0).min(1.0);
        thresholds.far *= 1.0 + 0.15 * strength * turn;

        let frozen = config.enable_micro_stutter_guard && qos.long_frame;
        let scaled = |base: u32| {
            if frozen {
                0
            } else {
                (f64::from(base) * qos.unhide_multiplier).floor() as usize
            }
        };

        Self {
            eye: predictor.observer_position(pose, config),
            forward: predictor.smoothed_forward(),
            thresholds,
            cone_degrees: FORWARD_CONE_DEGREES + TURN_WIDEN_DEGREES * strength * turn,
            slice_budget: scaled(config.slice_budget_per_tick),
            unhide_budget: scaled(config.unhide_per_tick),
        }
    }
}

struct Candidate {
    key: SliceKey,
    score: f64,
}

/// Tracks dirty quadrant slices per chunk and emits region rebuilds only once
/// a slice is worth rebuilding: visible or about to be, not debounced, and
/// within the per-tick budget.
pub struct DirtyRegionScheduler {
    config: QosConfig,
    clock: Rc<dyn Clock>,
    dirty: BTreeMap<ChunkId, u8>,
    pending: BTreeMap<ChunkId, SlicePending>,
    last_scheduled: BTreeMap<SliceKey, Instant>,
    last_visible: BTreeMap<SliceKey, u64>,
    unhide: VecDeque<RegionOrigin>,
    tick: u64,
    stats: SchedulerStats,
}

impl DirtyRegionScheduler {
    pub fn new(config: QosConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: QosConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            dirty: BTreeMap::new(),
            pending: BTreeMap::new(),
            last_scheduled: BTreeMap::new(),
            last_visible: BTreeMap::new(),
            unhide: VecDeque::new(),
            tick: 0,
            stats: SchedulerStats::default(),
        }
    }

    pub fn set_config(&mut self, config: QosConfig) {
        self.config = config;
    }

    /// Track a block edit at `pos`.
    ///
    /// The emptiness flags are diagnostic only: a block placed and removed again
    /// still needs its region rebuilt once.
    pub fn record_edit(&mut self, pos: IVec3, was_empty_before: bool, is_empty_after: bool) {
        let key = slice_key(pos);
        let chunk = key.chunk();
        let origin = RegionOrigin::containing(pos);
        *self.dirty.entry(chunk).or_default() |= 1 << key.slice_index;
        let inserted = self.pending.entry(chunk).or_default()[usize::from(key.slice_index)]
            .insert(origin);
        tracing::trace!(
            ?key,
            ?origin,
            was_empty_before,
            is_empty_after,
            new_origin = inserted,
            "edit recorded"
        );
    }

    /// The renderer processed `origin` this tick; every quadrant it covers was seen.
    pub fn mark_region_visible(&mut self, origin: RegionOrigin) {
        for key in slices_of(origin.chunk()) {
            self.last_visible.insert(key, self.tick);
        }
    }

    /// The host rebuilt `origin` through another path; stop tracking it.
    ///
    /// Dirty bits are left in place and cleared by the next flush. Returns
    /// whether the origin was pending in any slice.
    pub fn discard_region(&mut self, origin: RegionOrigin) -> bool {
        let Some(sets) = self.pending.get_mut(&origin.chunk()) else {
            return false;
        };
        let mut removed = false;
        for set in sets.iter_mut() {
            removed |= set.remove(&origin);
        }
        removed
    }

    /// Run one tick of visibility-gated flushing, emitting rebuilds into `sink`.
    ///
    /// Without an observer nothing happens and `None` is returned.
    pub fn flush_visible(
        &mut self,
        pose: Option<&ObserverPose>,
        predictor: &MovementPredictor,
        qos: &QosSnapshot,
        sink: &mut impl RebuildSink,
    ) -> Option<SchedulerStats> {
        let pose = pose?;
        self.tick += 1;
        let _span = tracing::info_span!("flush_visible", tick = self.tick).entered();

        let mut stats = SchedulerStats {
            tick: self.tick,
            ..SchedulerStats::default()
        };

        if self.config.enable_partial_meshing {
            let params = FlushParams::new(pose, predictor, qos, &self.config);
            stats.slice_budget = params.slice_budget;
            stats.unhide_budget = params.unhide_budget;
            let now = self.clock.now();
            let candidates = self.collect_candidates(&params, now, &mut stats);
            self.emit_candidates(candidates, params.slice_budget, sink, &mut stats);
            self.drain_unhide(params.unhide_budget, sink, &mut stats);
            self.prune_debounce(now);
        } else {
            self.flush_all(sink, &mut stats);
        }

        self.prune_clean_chunks();
        stats.dirty_slices = self.dirty_slice_count();
        stats.pending_unhide = self.unhide.len();
        tracing::trace!(
            flushed = stats.flushed,
            unhidden = stats.unhidden,
            deferred = stats.deferred,
            debounced = stats.debounced,
            skipped_empty = stats.skipped_empty,
            dirty = stats.dirty_slices,
            "flush complete"
        );
        self.stats = stats;
        Some(stats)
    }

    /// Partial meshing disabled: emit every pending origin of every dirty slice.
    fn flush_all(&mut self, sink: &mut impl RebuildSink, stats: &mut SchedulerStats) {
        for (chunk, mask) in std::mem::take(&mut self.dirty) {
            let Some(sets) = self.pending.remove(&chunk) else {
                continue;
            };
            for (index, set) in sets.into_iter().enumerate() {
                if mask & (1 << index) == 0 {
                    continue;
                }
                for origin in set {
                    sink.schedule_region_rebuild(origin, false);
                    stats.flushed += 1;
                }
            }
        }
        self.pending.clear();
        self.prune_debounce(self.clock.now());
    }

    fn collect_candidates(
        &mut self,
        params: &FlushParams,
        now: Instant,
        stats: &mut SchedulerStats,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for key in self.dirty_keys() {
            if self.pending_origins(key).is_none_or(BTreeSet::is_empty) {
                self.clear_dirty(key);
                stats.skipped_empty += 1;
                continue;
            }

            let target = representative_point(key, params.eye.y);
            if !self.is_eligible(params, target) {
                stats.deferred += 1;
                continue;
            }

            if self.debounce(key, now) {
                tracing::debug!(?key, "slice debounced");
                stats.debounced += 1;
                continue;
            }

            let last_seen = self.last_visible.get(&key).copied().unwrap_or(self.tick);
            let hidden_for = self.tick.saturating_sub(last_seen);
            if self.config.enable_visibility_deprioritization
                && hidden_for >= self.config.hidden_deprioritize_frames
            {
                let origins = self.take_pending(key);
                tracing::debug!(?key, hidden_for, queued = origins.len(), "slice deprioritized");
                self.unhide.extend(origins);
                self.clear_dirty(key);
                stats.deprioritized += 1;
            } else {
                candidates.push(Candidate {
                    key,
                    score: priority_score(params.eye, params.forward, target),
                });
            }
        }
        candidates
    }

    fn is_eligible(&self, params: &FlushParams, target: DVec3) -> bool {
        let t = params.thresholds;
        let dist = params.eye.distance(target);
        let culled = should_cull(
            params.eye,
            params.forward,
            target,
            t.front,
            t.behind,
            BEHIND_ANGLE_DEGREES,
        ) || dist > t.far;
        if !culled {
            return true;
        }
        self.config.enable_predictive_prefetch
            && in_forward_cone(params.eye, params.forward, target, params.cone_degrees)
            && dist < t.far * PREFETCH_FAR_SLACK
    }

    /// Whether `key` was scheduled inside the debounce window; stamps it if not.
    fn debounce(&mut self, key: SliceKey, now: Instant) -> bool {
        let window = Duration::from_millis(self.config.slice_debounce_millis);
        let recent = self
            .last_scheduled
            .get(&key)
            .is_some_and(|&last| now.saturating_duration_since(last) < window);
        if !recent {
            self.last_scheduled.insert(key, now);
        }
        recent
    }

    fn emit_candidates(
        &mut self,
        mut candidates: Vec<Candidate>,
        budget: usize,
        sink: &mut impl RebuildSink,
        stats: &mut SchedulerStats,
    ) {
        if self.config.enable_screen_space_budgeter {
            // Stable: equal scores keep chunk/slice order.
            candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        }

        let mut scheduled = 0;
        for candidate in candidates {
            if scheduled >= budget {
                break;
            }
            let key = candidate.key;
            let Some(sets) = self.pending.get_mut(&key.chunk()) else {
                continue;
            };
            let set = &mut sets[usize::from(key.slice_index)];
            while scheduled < budget {
                let Some(origin) = set.pop_first() else {
                    break;
                };
                tracing::debug!(?origin, score = candidate.score, "region rebuild scheduled");
                sink.schedule_region_rebuild(origin, false);
                scheduled += 1;
            }
            if set.is_empty() {
                self.clear_dirty(key);
            }
        }
        stats.flushed += scheduled;
    }

    fn drain_unhide(
        &mut self,
        budget: usize,
        sink: &mut impl RebuildSink,
        stats: &mut SchedulerStats,
    ) {
        if !self.config.enable_visibility_deprioritization {
            self.unhide.clear();
            return;
        }
        while stats.unhidden < budget {
            let Some(origin) = self.unhide.pop_front() else {
                break;
            };
            tracing::debug!(?origin, "region unhidden");
            sink.schedule_region_rebuild(origin, false);
            stats.unhidden += 1;
        }
    }

    fn prune_debounce(&mut self, now: Instant) {
        let window = Duration::from_millis(self.config.slice_debounce_millis);
        self.last_scheduled
            .retain(|_, last| now.saturating_duration_since(*last) < window);
    }

    fn prune_clean_chunks(&mut self) {
        self.dirty.retain(|_, mask| *mask != 0);
        let dirty = &self.dirty;
        self.pending.retain(|chunk, _| dirty.contains_key(chunk));
    }

    /// Purge every entry that references `chunk`.
    pub fn on_chunk_unload(&mut self, chunk: ChunkId) {
        self.dirty.remove(&chunk);
        self.pending.remove(&chunk);
        self.last_scheduled.retain(|key, _| !key.belongs_to(chunk));
        self.last_visible.retain(|key, _| !key.belongs_to(chunk));
        self.unhide.retain(|origin| origin.chunk() != chunk);
        tracing::debug!(?chunk, "chunk state purged");
    }

    /// Forget everything, including the tick counter.
    pub fn on_world_reset(&mut self) {
        tracing::info!(
            dirty = self.dirty_slice_count(),
            pending_unhide = self.unhide.len(),
            "world reset, dropping scheduler state"
        );
        self.dirty.clear();
        self.pending.clear();
        self.last_scheduled.clear();
        self.last_visible.clear();
        self.unhide.clear();
        self.tick = 0;
        self.stats = SchedulerStats::default();
    }

    fn dirty_keys(&self) -> Vec<SliceKey> {
        self.dirty
            .iter()
            .flat_map(|(&chunk, &mask)| {
                slices_of(chunk).filter(move |key| mask & (1 << key.slice_index) != 0)
            })
            .collect()
    }

    fn clear_dirty(&mut self, key: SliceKey) {
        if let Some(mask) = self.dirty.get_mut(&key.chunk()) {
            *mask &= !(1 << key.slice_index);
        }
    }

    fn take_pending(&mut self, key: SliceKey) -> BTreeSet<RegionOrigin> {
        self.pending
            .get_mut(&key.chunk())
            .map(|sets| std::mem::take(&mut sets[usize::from(key.slice_index)]))
            .unwrap_or_default()
    }

    pub fn is_dirty(&self, key: SliceKey) -> bool {
        self.dirty
            .get(&key.chunk())
            .is_some_and(|mask| mask & (1 << key.slice_index) != 0)
    }

    /// Region origins waiting on `key`, in emission order.
    pub fn pending_origins(&self, key: SliceKey) -> Option<&BTreeSet<RegionOrigin>> {
        self.pending
            .get(&key.chunk())
            .map(|sets| &sets[usize::from(key.slice_index)])
    }

    pub fn dirty_slice_count(&self) -> usize {
        self.dirty.values().map(|mask| mask.count_ones() as usize).sum()
    }

    pub fn pending_unhide_len(&self) -> usize {
        self.unhide.len()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Counters from the last flush that had an observer.
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Every chunk referenced by any internal map or queue.
    pub fn tracked_chunks(&self) -> BTreeSet<ChunkId> {
        let mut chunks: BTreeSet<ChunkId> = self.dirty.keys().copied().collect();
        chunks.extend(self.pending.keys().copied());
        chunks.extend(self.last_scheduled.keys().map(SliceKey::chunk));
        chunks.extend(self.last_visible.keys().map(SliceKey::chunk));
        chunks.extend(self.unhide.iter().map(RegionOrigin::chunk));
        chunks
    }
}
