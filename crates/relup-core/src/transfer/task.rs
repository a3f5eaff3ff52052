//! Task model: one file transfer tracked by the scheduler.

use std::fmt;

/// Task identifier, unique for the lifetime of a scheduler and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle state of a task.
///
/// Pending -> Running -> Completed | Failed. The last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transfer unit. `payload` and `metadata` are opaque to the scheduler and
/// handed unchanged to the executor.
#[derive(Debug, Clone)]
pub struct Task<P, M> {
    pub id: TaskId,
    pub payload: P,
    pub metadata: M,
    pub status: TaskStatus,
    /// Percent done, 0..=100.
    pub progress: u8,
    /// Set only when `status` is `Failed`.
    pub error: Option<String>,
}

impl<P, M> Task<P, M> {
    pub(crate) fn new(id: TaskId, payload: P, metadata: M) -> Self {
        Self {
            id,
            payload,
            metadata,
            status: TaskStatus::Pending,
            progress: 0,
            error: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.status = TaskStatus::Running;
    }

    /// Raise progress to `percent` (clamped to 100). Lower values are ignored so
    /// progress never moves backwards. Returns true if the stored value changed.
    pub(crate) fn advance(&mut self, percent: u32) -> bool {
        let percent = percent.min(100) as u8;
        if self.status != TaskStatus::Running || percent <= self.progress {
            return false;
        }
        self.progress = percent;
        true
    }

    pub(crate) fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.progress = 100;
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.status = TaskStatus::Failed;
        self.error = Some(message);
    }
}
