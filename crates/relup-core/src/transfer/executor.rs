//! Executor seam: how a single transfer is actually performed.
//!
//! The scheduler never moves bytes itself. Callers supply a
//! [`TransferExecutor`] (or a closure wrapped in [`FnExecutor`]); it receives
//! an owned copy of the task plus a [`ProgressReporter`] bound to that task.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use super::task::{Task, TaskId};

/// Performs one transfer. An `Err` (or a panic) marks the task failed; it never
/// affects other tasks in the batch.
#[async_trait]
pub trait TransferExecutor<P, M>: Send + Sync {
    async fn execute(&self, task: Task<P, M>, progress: ProgressReporter) -> anyhow::Result<()>;
}

#[async_trait]
impl<P, M, E> TransferExecutor<P, M> for Arc<E>
where
    P: Send + 'static,
    M: Send + 'static,
    E: TransferExecutor<P, M> + ?Sized,
{
    async fn execute(&self, task: Task<P, M>, progress: ProgressReporter) -> anyhow::Result<()> {
        (**self).execute(task, progress).await
    }
}

/// Adapts an async closure into a [`TransferExecutor`].
pub struct FnExecutor<F>(F);

impl<F> FnExecutor<F> {
    pub fn new<P, M, Fut>(f: F) -> Self
    where
        F: Fn(Task<P, M>, ProgressReporter) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        Self(f)
    }
}

#[async_trait]
impl<P, M, F, Fut> TransferExecutor<P, M> for FnExecutor<F>
where
    P: Send + 'static,
    M: Send + 'static,
    F: Fn(Task<P, M>, ProgressReporter) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn execute(&self, task: Task<P, M>, progress: ProgressReporter) -> anyhow::Result<()> {
        (self.0)(task, progress).await
    }
}

/// Receiver of progress updates; implemented by the scheduler's shared state.
pub(crate) trait ProgressTarget: Send + Sync {
    fn update(&self, id: TaskId, percent: u32) -> bool;
}

/// Handle an executor uses to report progress for its own task.
///
/// Updates are clamped to 100, never move progress backwards, and are ignored
/// once the task has settled.
#[derive(Clone)]
pub struct ProgressReporter {
    id: TaskId,
    target: Arc<dyn ProgressTarget>,
}

impl ProgressReporter {
    pub(crate) fn new(id: TaskId, target: Arc<dyn ProgressTarget>) -> Self {
        Self { id, target }
    }

    pub fn task_id(&self) -> TaskId {
        self.id
    }

    /// Report percent complete. Returns true if the stored progress changed.
    pub fn update(&self, percent: u32) -> bool {
        self.target.update(self.id, percent)
    }

    /// Report `done` out of `total` units (bytes, chunks). A zero total counts
    /// as fully done.
    pub fn update_fraction(&self, done: u64, total: u64) -> bool {
        let percent = if total == 0 {
            100
        } else {
            (done.min(total).saturating_mul(100) / total) as u32
        };
        self.update(percent)
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
