use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::{Duration, Instant};

use framekeeper_common::{Clock, system_clock};

use crate::task::{Priority, RenderTask, TaskError};

/// Budget used until a usable target rate is known (60 FPS).
pub const DEFAULT_FRAME_BUDGET: Duration = Duration::from_nanos(16_666_667);

/// Target rates at or above this are treated as uncapped.
const MAX_ACCEPTED_FPS: u32 = 260;

/// Share of the frame budget tasks may consume.
const BUDGET_FRACTION: f64 = 0.8;

/// Minimum spacing between statistics log lines.
pub const STATS_INTERVAL: Duration = Duration::from_secs(5);

struct QueuedTask {
    task: Box<dyn RenderTask>,
    submitted_at: Instant,
}

/// Task outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounters {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl TaskCounters {
    fn absorb(&mut self, other: TaskCounters) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Three FIFO queues of render tasks, drained high to low while the frame
/// has budget left.
pub struct TaskScheduler {
    clock: Rc<dyn Clock>,
    queues: [VecDeque<QueuedTask>; 3],
    target_fps: u32,
    frame_budget: Duration,
    frame_start: Instant,
    frame: TaskCounters,
    totals: TaskCounters,
    last_stats_log: Option<Instant>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Rc<dyn Clock>) -> Self {
        let frame_start = clock.now();
        Self {
            clock,
            queues: Default::default(),
            target_fps: 0,
            frame_budget: DEFAULT_FRAME_BUDGET,
            frame_start,
            frame: TaskCounters::default(),
            totals: TaskCounters::default(),
            last_stats_log: None,
        }
    }

    /// Queue `task` behind others of the same priority.
    pub fn submit(&mut self, task: Box<dyn RenderTask>) {
        let priority = task.priority();
        tracing::debug!(task = task.name(), %priority, "task submitted");
        self.queues[priority.index()].push_back(QueuedTask {
            task,
            submitted_at: self.clock.now(),
        });
    }

    /// The host frame limiter's current rate; 0 means uncapped.
    pub fn set_target_fps(&mut self, fps: u32) {
        self.target_fps = fps;
    }

    /// Start a frame: fold the previous frame's counters and stamp the start time.
    pub fn begin_frame(&mut self) {
        self.fold_frame();
        let now = self.clock.now();
        self.frame_start = now;

        let due = self
            .last_stats_log
            .is_none_or(|last| now.saturating_duration_since(last) > STATS_INTERVAL);
        if due {
            self.log_statistics();
            self.last_stats_log = Some(now);
        }
    }

    /// Fold this frame's counters into the running totals.
    pub fn end_frame(&mut self) {
        self.fold_frame();
    }

    fn fold_frame(&mut self) {
        let frame = std::mem::take(&mut self.frame);
        self.totals.absorb(frame);
    }

    /// Run queued tasks in priority order until 80% of the frame budget is spent.
    pub fn drain(&mut self) {
        self.refresh_budget();
        let _span = tracing::info_span!(
            "drain_tasks",
            queued = self.queued_count(),
            budget_ms = self.frame_budget.as_secs_f64() * 1000.0
        )
        .entered();

        for priority in Priority::ALL {
            while self.has_time_remaining() {
                let Some(queued) = self.queues[priority.index()].pop_front() else {
                    break;
                };
                self.run(queued, priority);
            }
        }
    }

    fn refresh_budget(&mut self) {
        if self.target_fps > 0 && self.target_fps < MAX_ACCEPTED_FPS {
            self.frame_budget = Duration::from_secs(1) / self.target_fps;
        }
    }

    fn has_time_remaining(&self) -> bool {
        let elapsed = self.clock.now().saturating_duration_since(self.frame_start);
        elapsed < self.frame_budget.mul_f64(BUDGET_FRACTION)
    }

    fn run(&mut self, queued: QueuedTask, priority: Priority) {
        let QueuedTask {
            mut task,
            submitted_at,
        } = queued;
        let started = self.clock.now();
        let age = started.saturating_duration_since(submitted_at);
        if !task.is_relevant(age) {
            self.frame.skipped += 1;
            tracing::debug!(task = task.name(), ?age, "stale task skipped");
            return;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.execute()))
            .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))));
        match outcome {
            Ok(()) => {
                self.frame.processed += 1;
                let elapsed = self.clock.now().saturating_duration_since(started);
                tracing::debug!(
                    task = task.name(),
                    %priority,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    "task executed"
                );
            }
            Err(error) => {
                self.frame.failed += 1;
                tracing::error!(task = task.name(), %error, "task failed");
            }
        }
    }

    fn log_statistics(&mut self) {
        tracing::info!(
            queued = self.queued_count(),
            high = self.queued(Priority::High),
            normal = self.queued(Priority::Normal),
            low = self.queued(Priority::Low),
            processed = self.totals.processed,
            skipped = self.totals.skipped,
            failed = self.totals.failed,
            "render task statistics"
        );
        self.totals = TaskCounters::default();
    }

    /// Drop every queued task.
    pub fn clear(&mut self) {
        let cleared = self.queued_count();
        for queue in &mut self.queues {
            queue.clear();
        }
        tracing::info!(cleared, "pending render tasks cleared");
    }

    pub fn queued_count(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn queued(&self, priority: Priority) -> usize {
        self.queues[priority.index()].len()
    }

    /// Counters since the last `begin_frame`/`end_frame`.
    pub fn this_frame(&self) -> TaskCounters {
        self.frame
    }

    pub fn processed_this_frame(&self) -> usize {
        self.frame.processed
    }

    pub fn skipped_this_frame(&self) -> usize {
        self.frame.skipped
    }

    pub fn failed_this_frame(&self) -> usize {
        self.frame.failed
    }

    /// Running totals since the last statistics log line.
    pub fn totals(&self) -> TaskCounters {
        self.totals
    }

    pub fn frame_budget(&self) -> Duration {
        self.frame_budget
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::FnTask;
    use framekeeper_common::ManualClock;
    use std::cell::RefCell;

    type Log = Rc<RefCell<Vec<String>>>;

    fn scheduler() -> (TaskScheduler, ManualClock) {
        let clock = ManualClock::new();
        (TaskScheduler::with_clock(Rc::new(clock.clone())), clock)
    }

    /// A task that records its name and burns `cost_ms` of clock time.
    fn timed(
        name: &str,
        priority: Priority,
        cost_ms: u64,
        clock: &ManualClock,
        log: &Log,
    ) -> Box<dyn RenderTask> {
        let clock = clock.clone();
        let log = Rc::clone(log);
        let label = name.to_string();
        Box::new(FnTask::new(name, priority, move || {
            log.borrow_mut().push(label.clone());
            clock.advance_ms(cost_ms);
            Ok(())
        }))
    }

    #[test]
    fn drains_high_then_normal_then_low() {
        let (mut s, clock) = scheduler();
        let log = Log::default();
        s.submit(timed("low", Priority::Low, 0, &clock, &log));
        s.submit(timed("normal", Priority::Normal, 0, &clock, &log));
        s.submit(timed("high-a", Priority::High, 0, &clock, &log));
        s.submit(timed("high-b", Priority::High, 0, &clock, &log));

        s.begin_frame();
        s.drain();
        assert_eq!(*log.borrow(), ["high-a", "high-b", "normal", "low"]);
        assert_eq!(s.processed_this_frame(), 4);
        assert_eq!(s.queued_count(), 0);
    }

    #[test]
    fn stops_at_eighty_percent_of_budget() {
        let (mut s, clock) = scheduler();
        let log = Log::default();
        s.set_target_fps(100);
        for name in ["h1", "h2", "h3"] {
            s.submit(timed(name, Priority::High, 3, &clock, &log));
        }
        s.submit(timed("n1", Priority::Normal, 3, &clock, &log));
        s.submit(timed("l1", Priority::Low, 3, &clock, &log));

        s.begin_frame();
        s.drain();
        // 10 ms budget: starts at 0, 3 and 6 ms fit under 8 ms, 9 ms does not.
        assert_eq!(*log.borrow(), ["h1", "h2", "h3"]);
        assert_eq!(s.queued(Priority::Normal), 1);
        assert_eq!(s.queued(Priority::Low), 1);

        s.begin_frame();
        s.drain();
        assert_eq!(s.queued_count(), 0);
    }

    #[test]
    fn budget_ignores_uncapped_rates() {
        let (mut s, _clock) = scheduler();
        s.set_target_fps(0);
        s.drain();
        assert_eq!(s.frame_budget(), DEFAULT_FRAME_BUDGET);
        s.set_target_fps(300);
        s.drain();
        assert_eq!(s.frame_budget(), DEFAULT_FRAME_BUDGET);
        s.set_target_fps(50);
        s.drain();
        assert_eq!(s.frame_budget(), Duration::from_millis(20));
        s.set_target_fps(260);
        s.drain();
        assert_eq!(s.frame_budget(), Duration::from_millis(20));
    }

    #[test]
    fn stale_tasks_are_skipped() {
        let (mut s, clock) = scheduler();
        let log = Log::default();
        s.submit(timed("old", Priority::High, 0, &clock, &log));
        clock.advance_ms(5000);
        s.submit(timed("fresh", Priority::High, 0, &clock, &log));

        s.begin_frame();
        s.drain();
        assert_eq!(*log.borrow(), ["fresh"]);
        assert_eq!(s.skipped_this_frame(), 1);
        assert_eq!(s.processed_this_frame(), 1);
    }

    struct Expiring {
        ran: Rc<RefCell<bool>>,
    }

    impl RenderTask for Expiring {
        fn name(&self) -> &str {
            "expiring"
        }

        fn priority(&self) -> Priority {
            Priority::Normal
        }

        fn execute(&mut self) -> Result<(), TaskError> {
            *self.ran.borrow_mut() = true;
            Ok(())
        }

        fn is_relevant(&self, age: Duration) -> bool {
            age < Duration::from_millis(100)
        }
    }

    #[test]
    fn custom_relevance_overrides_default() {
        let (mut s, clock) = scheduler();
        let ran = Rc::new(RefCell::new(false));
        s.submit(Box::new(Expiring { ran: Rc::clone(&ran) }));
        clock.advance_ms(150);
        s.begin_frame();
        s.drain();
        assert!(!*ran.borrow());
        assert_eq!(s.skipped_this_frame(), 1);
    }

    #[test]
    fn failures_do_not_stop_the_drain() {
        let (mut s, clock) = scheduler();
        let log = Log::default();
        s.submit(Box::new(FnTask::new("errs", Priority::High, || {
            Err(TaskError::Failed("missing buffer".into()))
        })));
        s.submit(Box::new(FnTask::new("panics", Priority::High, || -> Result<(), TaskError> {
            panic!("boom")
        })));
        s.submit(timed("after", Priority::Low, 0, &clock, &log));

        s.begin_frame();
        s.drain();
        assert_eq!(*log.borrow(), ["after"]);
        assert_eq!(
            s.this_frame(),
            TaskCounters {
                processed: 1,
                skipped: 0,
                failed: 2
            }
        );
    }

    #[test]
    fn totals_fold_and_reset_on_stats_interval() {
        let (mut s, clock) = scheduler();
        let log = Log::default();
        s.begin_frame();
        s.submit(timed("a", Priority::Normal, 0, &clock, &log));
        s.submit(timed("b", Priority::Normal, 0, &clock, &log));
        s.drain();
        s.end_frame();
        assert_eq!(s.totals().processed, 2);
        assert_eq!(s.processed_this_frame(), 0);

        clock.advance_ms(1000);
        s.begin_frame();
        assert_eq!(s.totals().processed, 2);

        clock.advance_ms(5000);
        s.begin_frame();
        assert_eq!(s.totals(), TaskCounters::default());
    }

    #[test]
    fn begin_frame_folds_without_end_frame() {
        let (mut s, clock) = scheduler();
        let log = Log::default();
        s.begin_frame();
        s.submit(timed("a", Priority::High, 0, &clock, &log));
        s.drain();
        clock.advance_ms(16);
        s.begin_frame();
        assert_eq!(s.totals().processed, 1);
        assert_eq!(s.processed_this_frame(), 0);
    }

    #[test]
    fn clear_empties_all_queues() {
        let (mut s, clock) = scheduler();
        let log = Log::default();
        for priority in Priority::ALL {
            s.submit(timed("t", priority, 0, &clock, &log));
        }
        assert_eq!(s.queued_count(), 3);
        s.clear();
        assert_eq!(s.queued_count(), 0);
        s.drain();
        assert!(log.borrow().is_empty());
    }
}
