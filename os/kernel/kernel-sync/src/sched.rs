use core::fmt;

/// Identity of a schedulable task (a process or kernel thread).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskId(u64);

impl TaskId {
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {}", self.0)
    }
}

/// The scheduling layer as seen by suspending locks.
///
/// `park`/`unpark` follow token semantics: an `unpark` delivered before the
/// target parks makes its next `park` return immediately. `park` may also
/// return spuriously; callers re-check their wake condition in a loop.
pub trait Scheduler: Send + Sync {
    /// The task running on the calling execution context.
    fn current_task(&self) -> TaskId;

    /// Suspend the current task until it is unparked or cancelled.
    fn park(&self);

    /// Make `task` runnable again.
    fn unpark(&self, task: TaskId);

    /// Whether `task` has been cancelled (killed) and should abandon waits.
    fn is_cancelled(&self, task: TaskId) -> bool;
}

/// A suspended wait ended because the waiting task was cancelled, not because
/// the resource became available.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("wait cancelled")]
pub struct Cancelled;
