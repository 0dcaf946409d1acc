use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

use framekeeper_common::{Clock, QosConfig, system_clock};

const ALPHA_FRAME: f64 = 0.2;

/// Starting estimate, roughly a 144 FPS frame.
const INITIAL_FRAME_MS: f64 = 7.0;

/// Frames kept in the frame-time window.
pub const FRAME_WINDOW_CAPACITY: usize = 120;

/// Budget multiplier for unhiding/scheduling work, in `[0.5, 1.5]`.
pub fn unhide_multiplier(target_ms: f64, ema_ms: f64, aggressiveness: f64) -> f64 {
    (1.0 + 0.8 * aggressiveness * budget_error(target_ms, ema_ms)).clamp(0.5, 1.5)
}

/// Multiplier for far cutoff distances, in `[0.75, 1.25]`.
pub fn far_cutoff_multiplier(target_ms: f64, ema_ms: f64, aggressiveness: f64) -> f64 {
    (1.0 + 0.5 * aggressiveness * budget_error(target_ms, ema_ms)).clamp(0.75, 1.25)
}

/// Scale for particle spawn budgets, in `[0.25, 1.5]`.
pub fn particle_budget_scale(target_ms: f64, ema_ms: f64, aggressiveness: f64) -> f64 {
    (1.0 + aggressiveness * budget_error(target_ms, ema_ms)).clamp(0.25, 1.5)
}

/// 0 = normal, 1 = aggressive, 2 = very aggressive.
pub fn lod_level(target_ms: f64, ema_ms: f64) -> u8 {
    if ema_ms < target_ms * 1.05 {
        0
    } else if ema_ms < target_ms * 1.25 {
        1
    } else {
        2
    }
}

/// Relative headroom: positive under budget, negative over budget.
fn budget_error(target_ms: f64, ema_ms: f64) -> f64 {
    (target_ms - ema_ms) / target_ms
}

/// Every controller output for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QosSnapshot {
    pub ema_frame_ms: f64,
    pub last_frame_ms: f64,
    pub long_frame: bool,
    pub unhide_multiplier: f64,
    pub far_cutoff_multiplier: f64,
    pub particle_budget_scale: f64,
    pub lod_level: u8,
}

impl Default for QosSnapshot {
    /// Neutral outputs: no scaling, no guard.
    fn default() -> Self {
        Self {
            ema_frame_ms: INITIAL_FRAME_MS,
            last_frame_ms: INITIAL_FRAME_MS,
            long_frame: false,
            unhide_multiplier: 1.0,
            far_cutoff_multiplier: 1.0,
            particle_budget_scale: 1.0,
            lod_level: 0,
        }
    }
}

/// Closed-loop frame-time controller.
///
/// Tracks an EMA of frame time against the configured target and maps the
/// relative error to bounded workload multipliers. Gain-scheduled, not PID:
/// every output is clamped so dependents cannot oscillate without limit.
pub struct FrameBudgetController {
    config: QosConfig,
    clock: Rc<dyn Clock>,
    last_frame_start: Option<Instant>,
    ema_frame_ms: f64,
    last_frame_ms: f64,
    long_frame: bool,
    window: FrameTimeWindow,
}

impl FrameBudgetController {
    pub fn new(config: QosConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: QosConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            last_frame_start: None,
            ema_frame_ms: INITIAL_FRAME_MS,
            last_frame_ms: INITIAL_FRAME_MS,
            long_frame: false,
            window: FrameTimeWindow::new(FRAME_WINDOW_CAPACITY),
        }
    }

    pub fn set_config(&mut self, config: QosConfig) {
        self.config = config;
    }

    /// Sample the clock at the start of a rendered frame.
    pub fn begin_frame(&mut self) {
        let now = self.clock.now();
        self.begin_frame_at(now);
    }

    /// Record a frame boundary at `now`.
    pub fn begin_frame_at(&mut self, now: Instant) {
        if let Some(previous) = self.last_frame_start {
            let dt = now.saturating_duration_since(previous);
            self.last_frame_ms = dt.as_secs_f64() * 1000.0;
            self.ema_frame_ms =
                self.ema_frame_ms * (1.0 - ALPHA_FRAME) + self.last_frame_ms * ALPHA_FRAME;
            self.update_long_frame_flag();
            self.window.push(self.last_frame_ms, self.long_frame);
            tracing::trace!(
                frame_ms = self.last_frame_ms,
                ema_ms = self.ema_frame_ms,
                long_frame = self.long_frame,
                "frame sampled"
            );
        }
        self.last_frame_start = Some(now);
    }

    fn update_long_frame_flag(&mut self) {
        self.long_frame = self.config.enable_micro_stutter_guard
            && self.last_frame_ms > self.config.stutter_threshold_ms();
        if self.long_frame {
            tracing::debug!(
                frame_ms = self.last_frame_ms,
                threshold_ms = self.config.stutter_threshold_ms(),
                "long frame, freezing heavy work"
            );
        }
    }

    pub fn ema_frame_ms(&self) -> f64 {
        self.ema_frame_ms
    }

    pub fn last_frame_ms(&self) -> f64 {
        self.last_frame_ms
    }

    pub fn target_frame_ms(&self) -> f64 {
        self.config.target_frame_ms()
    }

    pub fn was_long_frame(&self) -> bool {
        self.long_frame
    }

    pub fn unhide_multiplier(&self) -> f64 {
        unhide_multiplier(
            self.target_frame_ms(),
            self.ema_frame_ms,
            self.config.aggressiveness(),
        )
    }

    pub fn far_cutoff_multiplier(&self) -> f64 {
        far_cutoff_multiplier(
            self.target_frame_ms(),
            self.ema_frame_ms,
            self.config.aggressiveness(),
        )
    }

    pub fn particle_budget_scale(&self) -> f64 {
        particle_budget_scale(
            self.target_frame_ms(),
            self.ema_frame_ms,
            self.config.aggressiveness(),
        )
    }

    pub fn lod_level(&self) -> u8 {
        lod_level(self.target_frame_ms(), self.ema_frame_ms)
    }

    pub fn snapshot(&self) -> QosSnapshot {
        QosSnapshot {
            ema_frame_ms: self.ema_frame_ms,
            last_frame_ms: self.last_frame_ms,
            long_frame: self.long_frame,
            unhide_multiplier: self.unhide_multiplier(),
            far_cutoff_multiplier: self.far_cutoff_multiplier(),
            particle_budget_scale: self.particle_budget_scale(),
            lod_level: self.lod_level(),
        }
    }

    /// Recent frame times, for reporting.
    pub fn frame_window(&self) -> &FrameTimeWindow {
        &self.window
    }
}

/// Sliding window over the most recent frame times, in milliseconds.
///
/// Feeds percentile reporting; the controller itself only reads the EMA.
#[derive(Debug, Clone)]
pub struct FrameTimeWindow {
    samples: VecDeque<(f64, bool)>,
    capacity: usize,
    total_frames: u64,
}

impl FrameTimeWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total_frames: 0,
        }
    }

    /// Push one frame, evicting the oldest once full.
    pub fn push(&mut self, frame_ms: f64, long_frame: bool) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((frame_ms, long_frame));
        self.total_frames += 1;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frames pushed since construction, including evicted ones.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Nearest-rank percentile of the window; `p` in `[0, 100]`.
    pub fn percentile_ms(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().map(|&(ms, _)| ms).collect();
        sorted.sort_by(f64::total_cmp);
        let rank = (p.clamp(0.0, 100.0) / 100.0 * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }

    pub fn worst_ms(&self) -> f64 {
        self.samples.iter().map(|&(ms, _)| ms).fold(0.0, f64::max)
    }

    pub fn mean_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|&(ms, _)| ms).sum::<f64>() / self.samples.len() as f64
    }

    /// Frames in the window that tripped the stutter guard.
    pub fn long_frames(&self) -> usize {
        self.samples.iter().filter(|&&(_, long)| long).count()
    }
}
