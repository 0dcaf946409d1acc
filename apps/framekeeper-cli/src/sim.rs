use std::rc::Rc;

use framekeeper_common::{
    Aabb, ChunkId, ManualClock, ObserverPose, QosConfig, RebuildSink, RegionOrigin, WorldHost,
};
use framekeeper_qos::ParticleSpawn;
use framekeeper_runtime::QosRuntime;
use framekeeper_tasks::{FnTask, Priority};
use glam::{DVec3, IVec3};

/// Simulation tick length (20 ticks per second).
const TICK_MS: f64 = 50.0;

/// Chunks within this Chebyshev distance of the observer count as loaded.
const LOADED_RADIUS_CHUNKS: i32 = 8;

/// Every Nth frame takes three times as long.
const SPIKE_EVERY: u64 = 37;

/// Deterministic 64-bit generator for synthetic edits.
pub struct SplitMix64(u64);

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Uniform in `lo..hi`.
    pub fn range(&mut self, lo: i32, hi: i32) -> i32 {
        let span = (i64::from(hi) - i64::from(lo)).max(1) as u64;
        lo + (self.next_u64() % span) as i32
    }

    /// Uniform in `[0, 1)`.
    pub fn unit(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Synthetic host: an observer walking and turning at constant rates.
struct SimHost {
    position: DVec3,
    previous: DVec3,
    yaw_degrees: f64,
    world_tick: u64,
    rebuilt: Vec<RegionOrigin>,
}

impl SimHost {
    fn new() -> Self {
        let start = DVec3::new(0.5, 64.0, 0.5);
        Self {
            position: start,
            previous: start,
            yaw_degrees: 0.0,
            world_tick: 0,
            rebuilt: Vec::new(),
        }
    }

    fn forward(&self) -> DVec3 {
        let yaw = self.yaw_degrees.to_radians();
        DVec3::new(yaw.sin(), 0.0, yaw.cos())
    }

    fn advance(&mut self, speed: f64, turn_degrees: f64) {
        self.yaw_degrees = (self.yaw_degrees + turn_degrees) % 360.0;
        self.previous = self.position;
        self.position += self.forward() * speed;
        self.world_tick += 1;
    }

    fn chunk(&self) -> ChunkId {
        ChunkId::containing(self.position.floor().as_ivec3())
    }
}

impl RebuildSink for SimHost {
    fn schedule_region_rebuild(&mut self, origin: RegionOrigin, _force_next_frame: bool) {
        self.rebuilt.push(origin);
    }
}

impl WorldHost for SimHost {
    fn observer_pose(&self, tick_fraction: f32) -> Option<ObserverPose> {
        let t = f64::from(tick_fraction);
        Some(ObserverPose {
            position: self.previous.lerp(self.position, t),
            previous_position: self.previous,
            forward: self.forward(),
            pitch_degrees: 0.0,
        })
    }

    fn is_region_loaded(&self, chunk: ChunkId) -> bool {
        let here = self.chunk();
        (chunk.x - here.x).abs() <= LOADED_RADIUS_CHUNKS
            && (chunk.z - here.z).abs() <= LOADED_RADIUS_CHUNKS
    }

    fn tick_counter(&self) -> u64 {
        self.world_tick
    }

    fn target_fps(&self) -> u32 {
        0
    }
}

pub struct SimulationParams {
    pub ticks: u64,
    pub edits_per_tick: u32,
    pub frame_ms: f64,
    pub speed: f64,
    pub turn_degrees: f64,
    pub seed: u64,
}

#[derive(Debug, Default)]
pub struct SimulationTotals {
    pub edits: u64,
    pub rerenders_deferred: u64,
    pub rebuilds: u64,
    pub unhidden: u64,
    pub deferred: u64,
    pub debounced: u64,
    pub long_frames: u64,
    pub sections_culled: u64,
    pub regions_cancelled: u64,
    pub block_entities_culled: u64,
    pub particles_admitted: u64,
    pub particles_rejected: u64,
    pub tasks_processed: u64,
    pub frames: u64,
    pub frame_p50_ms: f64,
    pub frame_p95_ms: f64,
    pub frame_worst_ms: f64,
}

/// Drive a runtime through `params.ticks` synthetic ticks, printing one line per tick.
pub fn run(config: QosConfig, params: &SimulationParams) -> SimulationTotals {
    let clock = ManualClock::new();
    let mut rt = QosRuntime::with_clock(config, Rc::new(clock.clone()));
    let mut host = SimHost::new();
    let mut rng = SplitMix64::new(params.seed);
    let mut totals = SimulationTotals::default();

    let frame_ms = params.frame_ms.max(0.1);
    let frames_per_tick = (TICK_MS / frame_ms).round().max(1.0) as u64;
    let mut frame_index = 0u64;

    println!("tick  ema_ms  lod  flushed  unhidden  deferred  debounced  dirty  unhide_q");
    for _ in 0..params.ticks {
        host.advance(params.speed, params.turn_degrees);

        for i in 0..params.edits_per_tick {
            let pos = random_edit(&mut rng, host.position);
            if !rt.on_block_changed(&host, pos, i % 2 == 0, i % 3 == 0, 0.0) {
                totals.rerenders_deferred += 1;
            }
            totals.edits += 1;
        }
        rt.submit_task(Box::new(FnTask::new("sim-housekeeping", Priority::Low, || Ok(()))));

        for f in 0..frames_per_tick {
            frame_index += 1;
            let spike = if frame_index % SPIKE_EVERY == 0 { 3.0 } else { 1.0 };
            clock.advance_ms_f64(frame_ms * spike);
            rt.begin_render_frame(&host);
            if rt.snapshot().long_frame {
                totals.long_frames += 1;
            }
            rt.run_render_tasks();
            totals.tasks_processed += rt.tasks().processed_this_frame() as u64;

            let fraction = (f + 1) as f32 / frames_per_tick as f32;
            totals.regions_cancelled += render_nearby_regions(&mut rt, &host, fraction);
            check_block_entities(&mut rt, &host, fraction);
            spawn_particles(&mut rt, &host, &mut rng, fraction);
        }
        totals.sections_culled += rt.sections().culled_this_tick();
        totals.block_entities_culled += rt.block_entities().culled_this_tick();
        totals.particles_admitted += rt.particles().admitted_this_tick();
        totals.particles_rejected += rt.particles().rejected_this_tick();

        host.rebuilt.clear();
        let Some(stats) = rt.end_tick(&mut host, 1.0) else {
            continue;
        };
        totals.rebuilds += stats.flushed as u64;
        totals.unhidden += stats.unhidden as u64;
        totals.deferred += stats.deferred as u64;
        totals.debounced += stats.debounced as u64;

        let qos = rt.snapshot();
        println!(
            "{:>4}  {:>6.2}  {:>3}  {:>7}  {:>8}  {:>8}  {:>9}  {:>5}  {:>8}",
            stats.tick,
            qos.ema_frame_ms,
            qos.lod_level,
            stats.flushed,
            stats.unhidden,
            stats.deferred,
            stats.debounced,
            stats.dirty_slices,
            stats.pending_unhide
        );
    }

    let window = rt.controller().frame_window();
    totals.frames = window.total_frames();
    totals.frame_p50_ms = window.percentile_ms(50.0);
    totals.frame_p95_ms = window.percentile_ms(95.0);
    totals.frame_worst_ms = window.worst_ms();
    totals
}

/// An edit within 96 blocks of the observer.
fn random_edit(rng: &mut SplitMix64, around: DVec3) -> IVec3 {
    let c = around.floor().as_ivec3();
    IVec3::new(
        c.x + rng.range(-96, 96),
        rng.range(0, 128),
        c.z + rng.range(-96, 96),
    )
}

/// Stand-in for the host renderer: schedule the regions around the observer
/// and draw the admitted ones. Returns how many were cancelled.
fn render_nearby_regions(rt: &mut QosRuntime, host: &SimHost, fraction: f32) -> u64 {
    let mut cancelled = 0;
    let here = host.chunk();
    let y = ((host.position.y.floor() as i32) >> 4) << 4;
    for dx in -2..=2 {
        for dz in -2..=2 {
            let origin = RegionOrigin {
                x: (here.x + dx) * 16,
                y,
                z: (here.z + dz) * 16,
            };
            if rt.admit_region_render(host, origin, fraction) {
                rt.section_visible(host, &Aabb::of_region(origin), fraction);
            } else {
                cancelled += 1;
            }
        }
    }
    cancelled
}

/// A ring of chests around the observer, one per neighboring chunk.
fn check_block_entities(rt: &mut QosRuntime, host: &SimHost, fraction: f32) {
    let here = host.chunk();
    for dx in -3..=3 {
        for dz in -3..=3 {
            let chest = IVec3::new(here.base_x() + dx * 16 + 8, 64, here.base_z() + dz * 16 + 8);
            rt.block_entity_visible(host, chest, fraction);
        }
    }
}

fn spawn_particles(
    rt: &mut QosRuntime,
    host: &SimHost,
    rng: &mut SplitMix64,
    fraction: f32,
) {
    for _ in 0..4 {
        let offset = DVec3::new(
            f64::from(rng.range(-80, 80)),
            0.0,
            f64::from(rng.range(-80, 80)),
        );
        let spawn = ParticleSpawn {
            particle_id: "sim:spark",
            position: host.position + offset,
            roll: rng.unit(),
        };
        rt.admit_particle(host, &spawn, fraction);
    }
}
