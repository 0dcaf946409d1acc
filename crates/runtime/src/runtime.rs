use std::rc::Rc;

use framekeeper_common::{Aabb, ChunkId, Clock, QosConfig, RegionOrigin, WorldHost, system_clock};
use framekeeper_qos::{
    Admission, BlockEntityCuller, CullReason, CullView, EntityCuller, FrameBudgetController,
    MovementPredictor, ParticleGate, ParticleSpawn, QosSnapshot, SectionCuller,
    region_render_culled,
};
use framekeeper_stream::{DirtyRegionScheduler, SchedulerStats};
use framekeeper_tasks::{RenderTask, TaskScheduler};
use glam::{DVec3, IVec3};

/// Owns every scheduler component and calls them in the required order.
///
/// Hosts drive it from two places: [`QosRuntime::begin_render_frame`] and
/// [`QosRuntime::run_render_tasks`] once per rendered frame, and
/// [`QosRuntime::end_tick`] once per simulation tick.
pub struct QosRuntime {
    config: QosConfig,
    controller: FrameBudgetController,
    predictor: MovementPredictor,
    scheduler: DirtyRegionScheduler,
    tasks: TaskScheduler,
    sections: SectionCuller,
    entities: EntityCuller,
    block_entities: BlockEntityCuller,
    particles: ParticleGate,
}

impl QosRuntime {
    pub fn new(config: QosConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: QosConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            controller: FrameBudgetController::with_clock(config.clone(), Rc::clone(&clock)),
            predictor: MovementPredictor::new(),
            scheduler: DirtyRegionScheduler::with_clock(config.clone(), Rc::clone(&clock)),
            tasks: TaskScheduler::with_clock(clock),
            sections: SectionCuller::new(config.clone()),
            entities: EntityCuller::new(config.clone()),
            block_entities: BlockEntityCuller::new(config.clone()),
            particles: ParticleGate::new(config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &QosConfig {
        &self.config
    }

    /// Replace the configuration in every component.
    pub fn set_config(&mut self, config: QosConfig) {
        self.controller.set_config(config.clone());
        self.scheduler.set_config(config.clone());
        self.sections.set_config(config.clone());
        self.entities.set_config(config.clone());
        self.block_entities.set_config(config.clone());
        self.particles.set_config(config.clone());
        self.config = config;
    }

    /// Start of a rendered frame: sample frame time, then open the task frame.
    pub fn begin_render_frame(&mut self, host: &impl WorldHost) {
        self.controller.begin_frame();
        if self.config.enable_render_scheduler {
            self.tasks.set_target_fps(host.target_fps());
            self.tasks.begin_frame();
        }
    }

    pub fn run_render_tasks(&mut self) {
        if self.config.enable_render_scheduler {
            self.tasks.drain();
        }
    }

    /// End of a simulation tick: learn movement, reset per-tick gates, flush
    /// dirty regions into `host`.
    pub fn end_tick<H: WorldHost>(
        &mut self,
        host: &mut H,
        tick_fraction: f32,
    ) -> Option<SchedulerStats> {
        let pose = host.observer_pose(tick_fraction);
        self.predictor.update(pose.as_ref());

        self.sections.end_tick(host.tick_counter());
        self.entities.end_tick();
        self.block_entities.end_tick();
        self.particles.end_tick();

        let qos = self.controller.snapshot();
        let stats = self
            .scheduler
            .flush_visible(pose.as_ref(), &self.predictor, &qos, host);
        self.tasks.end_frame();

        tracing::trace!(
            ema_ms = qos.ema_frame_ms,
            lod = qos.lod_level,
            flushed = stats.map(|s| s.flushed),
            "tick complete"
        );
        stats
    }

    pub fn record_edit(&mut self, pos: IVec3, was_empty_before: bool, is_empty_after: bool) {
        self.scheduler.record_edit(pos, was_empty_before, is_empty_after);
    }

    pub fn mark_region_visible(&mut self, origin: RegionOrigin) {
        self.scheduler.mark_region_visible(origin);
    }

    pub fn discard_region(&mut self, origin: RegionOrigin) -> bool {
        self.scheduler.discard_region(origin)
    }

    pub fn submit_task(&mut self, task: Box<dyn RenderTask>) {
        self.tasks.submit(task);
    }

    /// A block changed at `pos`. The edit is tracked either way; returns
    /// whether the host may rerender the region now rather than wait for the
    /// scheduler to flush it.
    pub fn on_block_changed(
        &mut self,
        host: &impl WorldHost,
        pos: IVec3,
        was_empty_before: bool,
        is_empty_after: bool,
        tick_fraction: f32,
    ) -> bool {
        self.scheduler.record_edit(pos, was_empty_before, is_empty_after);
        let Some(view) = self.predicted_view(host, tick_fraction) else {
            return true;
        };
        let deferred = region_render_culled(&view, pos.as_dvec3() + DVec3::splat(0.5));
        if deferred {
            tracing::debug!(?pos, "block rerender deferred");
        }
        !deferred
    }

    /// The host is about to schedule a render of the region at `origin`.
    ///
    /// Returns false when the region is out of view and the render should be
    /// dropped. An admitted region is stamped as seen by the dirty-region
    /// scheduler.
    pub fn admit_region_render(
        &mut self,
        host: &impl WorldHost,
        origin: RegionOrigin,
        tick_fraction: f32,
    ) -> bool {
        let center = origin.as_ivec3().as_dvec3() + DVec3::splat(8.0);
        let view = self.predicted_view(host, tick_fraction);
        if view.is_some_and(|v| region_render_culled(&v, center)) {
            tracing::debug!(?origin, "region render cancelled");
            return false;
        }
        self.scheduler.mark_region_visible(origin);
        true
    }

    /// Whether the host should draw the section box `aabb`.
    pub fn section_visible(
        &mut self,
        host: &impl WorldHost,
        aabb: &Aabb,
        tick_fraction: f32,
    ) -> bool {
        let view = host.observer_pose(tick_fraction).map(|pose| CullView {
            eye: pose.position,
            forward: self.predictor.smoothed_forward(),
            speed: self.predictor.smoothed_speed(),
            pitch_degrees: pose.pitch_degrees,
        });
        self.sections
            .is_visible(view.as_ref(), aabb, host.tick_counter())
    }

    /// `None` means draw the entity at `position`.
    pub fn entity_visible(
        &mut self,
        host: &impl WorldHost,
        position: DVec3,
        tick_fraction: f32,
    ) -> Option<CullReason> {
        let view = self.predicted_view(host, tick_fraction);
        let qos = self.controller.snapshot();
        self.entities
            .check(view.as_ref(), position, &qos, host.tick_counter())
    }

    /// `None` means draw the block entity at `block`.
    pub fn block_entity_visible(
        &mut self,
        host: &impl WorldHost,
        block: IVec3,
        tick_fraction: f32,
    ) -> Option<CullReason> {
        let view = self.predicted_view(host, tick_fraction);
        let qos = self.controller.snapshot();
        self.block_entities
            .check(view.as_ref(), block, &qos, host.tick_counter())
    }

    pub fn admit_particle(
        &mut self,
        host: &impl WorldHost,
        spawn: &ParticleSpawn<'_>,
        tick_fraction: f32,
    ) -> Admission {
        let observer = self.predicted_view(host, tick_fraction).map(|v| v.eye);
        let qos = self.controller.snapshot();
        self.particles
            .admit(spawn, observer, &qos, |chunk| host.is_region_loaded(chunk))
    }

    fn predicted_view(&self, host: &impl WorldHost, tick_fraction: f32) -> Option<CullView> {
        host.observer_pose(tick_fraction).map(|pose| CullView {
            eye: self.predictor.observer_position(&pose, &self.config),
            forward: self.predictor.smoothed_forward(),
            speed: self.predictor.smoothed_speed(),
            pitch_degrees: pose.pitch_degrees,
        })
    }

    pub fn on_chunk_unload(&mut self, chunk: ChunkId) {
        self.scheduler.on_chunk_unload(chunk);
    }

    pub fn on_world_reset(&mut self) {
        self.scheduler.on_world_reset();
        self.tasks.clear();
        self.sections.reset();
    }

    pub fn snapshot(&self) -> QosSnapshot {
        self.controller.snapshot()
    }

    pub fn controller(&self) -> &FrameBudgetController {
        &self.controller
    }

    pub fn predictor(&self) -> &MovementPredictor {
        &self.predictor
    }

    pub fn scheduler(&self) -> &DirtyRegionScheduler {
        &self.scheduler
    }

    pub fn tasks(&self) -> &TaskScheduler {
        &self.tasks
    }

    pub fn sections(&self) -> &SectionCuller {
        &self.sections
    }

    pub fn entities(&self) -> &EntityCuller {
        &self.entities
    }

    pub fn block_entities(&self) -> &BlockEntityCuller {
        &self.block_entities
    }

    pub fn particles(&self) -> &ParticleGate {
        &self.particles
    }
}
