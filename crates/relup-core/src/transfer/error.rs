use thiserror::Error;

use super::task::{TaskId, TaskStatus};

/// Errors returned by scheduler operations. A failing transfer is never one of
/// these; it is recorded on its task instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("task {id} is {status}; only pending tasks can be removed")]
    InvalidState { id: TaskId, status: TaskStatus },

    #[error("scheduler is already running a batch")]
    AlreadyRunning,
}
