//! Whole-loop scenarios driven through a scripted host.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use framekeeper_common::{
    Aabb, ChunkId, ManualClock, ObserverPose, QosConfig, RebuildSink, RegionOrigin, WorldHost,
};
use framekeeper_qos::{CullReason, ParticleSpawn};
use framekeeper_tasks::{FnTask, Priority};
use glam::{DVec3, IVec3};

use crate::QosRuntime;

/// Host double with a scripted observer and a recording rebuild sink.
struct SimHost {
    pose: Option<ObserverPose>,
    loaded: BTreeSet<ChunkId>,
    rebuilt: Vec<RegionOrigin>,
    world_tick: u64,
    fps: u32,
}

impl SimHost {
    fn standing() -> Self {
        Self {
            pose: Some(ObserverPose::stationary(DVec3::new(0.0, 64.0, 0.0), DVec3::Z)),
            loaded: BTreeSet::from([ChunkId::new(0, 0)]),
            rebuilt: Vec::new(),
            world_tick: 0,
            fps: 60,
        }
    }

    /// Observer reported as moving +Z at one block per tick.
    fn running() -> Self {
        let mut host = Self::standing();
        if let Some(pose) = host.pose.as_mut() {
            pose.previous_position = pose.position - DVec3::Z;
        }
        host
    }
}

impl RebuildSink for SimHost {
    fn schedule_region_rebuild(&mut self, origin: RegionOrigin, _force_next_frame: bool) {
        self.rebuilt.push(origin);
    }
}

impl WorldHost for SimHost {
    fn observer_pose(&self, _tick_fraction: f32) -> Option<ObserverPose> {
        self.pose
    }

    fn is_region_loaded(&self, chunk: ChunkId) -> bool {
        self.loaded.contains(&chunk)
    }

    fn tick_counter(&self) -> u64 {
        self.world_tick
    }

    fn target_fps(&self) -> u32 {
        self.fps
    }
}

fn runtime(config: QosConfig) -> (QosRuntime, ManualClock) {
    let clock = ManualClock::new();
    (QosRuntime::with_clock(config, Rc::new(clock.clone())), clock)
}

#[test]
fn long_frame_defers_rebuilds_until_frames_recover() {
    let (mut rt, clock) = runtime(QosConfig::default());
    let mut host = SimHost::standing();

    rt.begin_render_frame(&host);
    clock.advance_ms(40);
    rt.begin_render_frame(&host);
    assert!(rt.snapshot().long_frame);

    rt.record_edit(IVec3::new(2, 64, 3), false, true);
    let stats = rt.end_tick(&mut host, 0.0).expect("observer present");
    assert_eq!(stats.slice_budget, 0);
    assert_eq!(stats.unhide_budget, 0);
    assert!(host.rebuilt.is_empty());

    clock.advance_ms(250);
    rt.begin_render_frame(&host);
    clock.advance_ms(8);
    rt.begin_render_frame(&host);
    assert!(!rt.snapshot().long_frame);

    rt.end_tick(&mut host, 0.0);
    assert_eq!(host.rebuilt, vec![RegionOrigin { x: 0, y: 64, z: 0 }]);
}

#[test]
fn speed_extends_the_front_cutoff() {
    // Slice center about 69 blocks out, 40 degrees off the look axis.
    let edit = IVec3::new(42, 64, 50);

    let (mut rt, _clock) = runtime(QosConfig::default());
    let mut host = SimHost::standing();
    for _ in 0..40 {
        rt.end_tick(&mut host, 0.0);
    }
    rt.record_edit(edit, false, true);
    let stats = rt.end_tick(&mut host, 0.0).expect("observer present");
    assert_eq!(stats.deferred, 1);
    assert!(host.rebuilt.is_empty());

    let (mut rt, _clock) = runtime(QosConfig::default());
    let mut host = SimHost::running();
    for _ in 0..40 {
        rt.end_tick(&mut host, 0.0);
    }
    assert!(rt.predictor().smoothed_speed() > 0.99);
    rt.record_edit(edit, false, true);
    rt.end_tick(&mut host, 0.0);
    assert_eq!(host.rebuilt, vec![RegionOrigin::containing(edit)]);
}

#[test]
fn render_tasks_follow_the_scheduler_toggle() {
    let ran = Rc::new(RefCell::new(Vec::new()));
    let task = |name: &'static str, priority| {
        let ran = Rc::clone(&ran);
        Box::new(FnTask::new(name, priority, move || {
            ran.borrow_mut().push(name);
            Ok(())
        }))
    };

    let (mut rt, _clock) = runtime(QosConfig::default());
    let host = SimHost::standing();
    rt.submit_task(task("low", Priority::Low));
    rt.submit_task(task("high", Priority::High));
    rt.begin_render_frame(&host);
    rt.run_render_tasks();
    assert_eq!(*ran.borrow(), ["high", "low"]);
    assert_eq!(rt.tasks().frame_budget().as_micros(), 16_666);

    let (mut rt, _clock) = runtime(QosConfig {
        enable_render_scheduler: false,
        ..QosConfig::default()
    });
    rt.submit_task(task("never", Priority::High));
    rt.begin_render_frame(&host);
    rt.run_render_tasks();
    assert_eq!(ran.borrow().len(), 2);
    assert_eq!(rt.tasks().queued_count(), 1);
}

#[test]
fn chunk_unload_after_busy_session_leaves_no_trace() {
    let (mut rt, clock) = runtime(QosConfig {
        hidden_deprioritize_frames: 3,
        unhide_per_tick: 2,
        slice_budget_per_tick: 3,
        ..QosConfig::default()
    });
    let mut host = SimHost::standing();

    let chunks: Vec<ChunkId> = (-2..=2)
        .flat_map(|x| (-2..=2).map(move |z| ChunkId::new(x, z)))
        .collect();
    for (tick, chunk) in chunks.iter().cycle().take(60).enumerate() {
        let tick = tick as i32;
        let pos = IVec3::new(
            chunk.base_x() + tick % 16,
            (tick * 7) % 128,
            chunk.base_z() + (tick * 3) % 16,
        );
        rt.record_edit(pos, false, true);
        if tick % 4 == 0 {
            rt.mark_region_visible(RegionOrigin {
                x: chunk.base_x(),
                y: 64,
                z: chunk.base_z(),
            });
        }
        clock.advance_ms(50);
        rt.end_tick(&mut host, 0.0);
    }
    assert!(!rt.scheduler().tracked_chunks().is_empty());

    for chunk in &chunks {
        rt.on_chunk_unload(*chunk);
        assert!(!rt.scheduler().tracked_chunks().contains(chunk));
    }
    assert!(rt.scheduler().tracked_chunks().is_empty());
    assert_eq!(rt.scheduler().pending_unhide_len(), 0);
}

#[test]
fn world_reset_clears_every_component() {
    let (mut rt, _clock) = runtime(QosConfig::default());
    let mut host = SimHost::standing();
    rt.record_edit(IVec3::new(200, 64, 3), false, true);
    rt.submit_task(Box::new(FnTask::new("t", Priority::Normal, || Ok(()))));
    rt.end_tick(&mut host, 0.0);
    let near = Aabb::of_region(RegionOrigin { x: 0, y: 64, z: 16 });
    assert!(rt.section_visible(&host, &near, 0.0));
    assert!(rt.sections().hysteresis_entries() > 0);

    rt.on_world_reset();
    assert_eq!(rt.scheduler().tick(), 0);
    assert!(rt.scheduler().tracked_chunks().is_empty());
    assert_eq!(rt.tasks().queued_count(), 0);
    assert_eq!(rt.sections().hysteresis_entries(), 0);
}

#[test]
fn gates_use_the_current_observer() {
    let (mut rt, _clock) = runtime(QosConfig::default());
    let mut host = SimHost::standing();
    rt.end_tick(&mut host, 0.0);

    assert_eq!(
        rt.entity_visible(&host, DVec3::new(0.0, 80.0, 5.0), 0.0),
        Some(CullReason::VerticalBand)
    );
    assert_eq!(rt.entity_visible(&host, DVec3::new(0.0, 64.0, 5.0), 0.0), None);
    assert_eq!(rt.entities().culled_this_tick(), 1);

    let spawn = |x: f64| ParticleSpawn {
        particle_id: "flame",
        position: DVec3::new(x, 64.0, 4.0),
        roll: 0.0,
    };
    assert!(rt.admit_particle(&host, &spawn(4.0), 0.0).is_admitted());
    assert!(!rt.admit_particle(&host, &spawn(-4.0), 0.0).is_admitted());

    host.pose = None;
    let far = Aabb::of_region(RegionOrigin { x: 0, y: 64, z: 800 });
    assert!(rt.section_visible(&host, &far, 0.0));
    assert_eq!(rt.entity_visible(&host, DVec3::new(0.0, 200.0, 0.0), 0.0), None);
}

#[test]
fn admitted_region_renders_count_as_seen() {
    let (mut rt, clock) = runtime(QosConfig {
        hidden_deprioritize_frames: 2,
        ..QosConfig::default()
    });
    let mut host = SimHost::standing();
    rt.end_tick(&mut host, 0.0);

    let ahead = RegionOrigin { x: 0, y: 64, z: 16 };
    let behind = RegionOrigin { x: 0, y: 64, z: -64 };
    assert!(rt.admit_region_render(&host, ahead, 0.0));
    assert!(!rt.admit_region_render(&host, behind, 0.0));
    let tracked = rt.scheduler().tracked_chunks();
    assert!(tracked.contains(&ahead.chunk()));
    assert!(!tracked.contains(&behind.chunk()));

    // Not rendered for three ticks: the next edit there waits in the unhide queue.
    for _ in 0..3 {
        rt.end_tick(&mut host, 0.0);
    }
    rt.record_edit(IVec3::new(2, 64, 18), false, true);
    let stats = rt.end_tick(&mut host, 0.0).expect("observer present");
    assert_eq!(stats.deprioritized, 1);
    assert_eq!(stats.unhidden, 1);

    // Rendered again this tick: the edit goes straight to the candidates.
    assert!(rt.admit_region_render(&host, ahead, 0.0));
    rt.record_edit(IVec3::new(2, 80, 18), false, true);
    clock.advance_ms(250);
    let stats = rt.end_tick(&mut host, 0.0).expect("observer present");
    assert_eq!(stats.deprioritized, 0);
    assert_eq!(stats.flushed, 1);
}

#[test]
fn block_changes_out_of_view_defer_the_rerender() {
    let (mut rt, _clock) = runtime(QosConfig::default());
    let mut host = SimHost::standing();
    rt.end_tick(&mut host, 0.0);

    assert!(rt.on_block_changed(&host, IVec3::new(2, 64, 10), false, true, 0.0));
    assert!(!rt.on_block_changed(&host, IVec3::new(2, 64, -50), true, false, 0.0));
    assert_eq!(rt.scheduler().dirty_slice_count(), 2);

    host.pose = None;
    assert!(rt.on_block_changed(&host, IVec3::new(2, 64, -50), false, true, 0.0));
}

#[test]
fn block_entities_have_their_own_gate() {
    let (mut rt, _clock) = runtime(QosConfig::default());
    let mut host = SimHost::standing();
    rt.end_tick(&mut host, 0.0);

    assert_eq!(
        rt.block_entity_visible(&host, IVec3::new(0, 80, 4), 0.0),
        Some(CullReason::VerticalBand)
    );
    assert_eq!(rt.block_entity_visible(&host, IVec3::new(0, 64, 4), 0.0), None);
    assert_eq!(rt.block_entities().culled_this_tick(), 1);
    assert_eq!(rt.entities().culled_this_tick(), 0);
    rt.end_tick(&mut host, 0.0);
    assert_eq!(rt.block_entities().culled_this_tick(), 0);

    rt.set_config(QosConfig {
        enable_block_entity_culling: false,
        ..QosConfig::default()
    });
    assert_eq!(rt.block_entity_visible(&host, IVec3::new(0, 80, 4), 0.0), None);
}
