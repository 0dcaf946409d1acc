use std::fmt;
use std::time::Duration;

/// Tasks this old or older are stale unless they say otherwise.
pub const STALE_AFTER: Duration = Duration::from_secs(5);

/// Which queue a task waits in. Higher priorities drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// Must run this frame: visible chunks, nearby entities.
    High,
    /// Should run soon: particles, effects.
    Normal,
    /// Can wait: distant chunks, background updates.
    Low,
}

impl Priority {
    /// Drain order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::High => "HIGH",
            Priority::Normal => "NORMAL",
            Priority::Low => "LOW",
        };
        f.write_str(name)
    }
}

/// Errors a task can report from [`RenderTask::execute`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// A unit of deferrable render work.
pub trait RenderTask {
    fn name(&self) -> &str;

    fn priority(&self) -> Priority;

    fn execute(&mut self) -> Result<(), TaskError>;

    /// Whether the task is still worth running `age` after submission.
    fn is_relevant(&self, age: Duration) -> bool {
        age < STALE_AFTER
    }
}

/// A task backed by a closure.
pub struct FnTask<F> {
    name: String,
    priority: Priority,
    run: F,
}

impl<F> FnTask<F>
where
    F: FnMut() -> Result<(), TaskError>,
{
    pub fn new(name: impl Into<String>, priority: Priority, run: F) -> Self {
        Self {
            name: name.into(),
            priority,
            run,
        }
    }
}

impl<F> RenderTask for FnTask<F>
where
    F: FnMut() -> Result<(), TaskError>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn execute(&mut self) -> Result<(), TaskError> {
        (self.run)()
    }
}
