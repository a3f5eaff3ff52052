//! Bounded-concurrency control loop.
//!
//! Keeps up to `max_concurrent` transfers in flight; when one settles, the next
//! queued task is admitted until both the queue and the active set are empty.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};

use super::error::SchedulerError;
use super::event::TransferEvent;
use super::executor::{ProgressReporter, ProgressTarget, TransferExecutor};
use super::progress::{BatchSummary, ProgressSink};
use super::registry::TaskRegistry;
use super::task::{Task, TaskId};

/// State shared between the scheduler handle, the control loop and the
/// progress reporters handed to executors.
struct Shared<P, M> {
    registry: Mutex<TaskRegistry<P, M>>,
    sink: Option<Arc<dyn ProgressSink<P, M>>>,
    /// Wakes the control loop when work is enqueued while it waits.
    wake: Notify,
    running: AtomicBool,
}

impl<P: Clone, M: Clone> Shared<P, M> {
    fn lock(&self) -> MutexGuard<'_, TaskRegistry<P, M>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one mutation under the lock and, if it produced an event, notify
    /// the sink with a snapshot taken under the same lock.
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut TaskRegistry<P, M>) -> (R, Option<TransferEvent>),
    ) -> R {
        let mut registry = self.lock();
        let (out, event) = f(&mut registry);
        if let (Some(event), Some(sink)) = (event, self.sink.as_ref()) {
            sink.notify(&event, &registry.snapshot());
        }
        out
    }

    fn settle(&self, id: TaskId, outcome: Result<(), String>) {
        match &outcome {
            Ok(()) => tracing::debug!(task = %id, "transfer completed"),
            Err(message) => tracing::warn!(task = %id, error = %message, "transfer failed"),
        }
        self.mutate(|registry| ((), registry.settle(id, outcome)));
    }
}

/// Settles one task when dropped, whether the wrapper task finished, panicked
/// or was aborted along with a dropped `run`. No task is left `Running`.
struct Settlement<P: Clone, M: Clone> {
    shared: Arc<Shared<P, M>>,
    id: TaskId,
    outcome: Option<Result<(), String>>,
}

impl<P: Clone, M: Clone> Drop for Settlement<P, M> {
    fn drop(&mut self) {
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| Err("transfer cancelled before it settled".to_string()));
        self.shared.settle(self.id, outcome);
    }
}

/// Aborts the executor task when dropped so it never outlives its wrapper.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<P, M> ProgressTarget for Shared<P, M>
where
    P: Clone + Send,
    M: Clone + Send,
{
    fn update(&self, id: TaskId, percent: u32) -> bool {
        self.mutate(|registry| {
            let event = registry.update_progress(id, percent);
            (event.is_some(), event)
        })
    }
}

/// Clears the running flag when `run` returns or its future is dropped.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Admits transfer tasks, runs at most `max_concurrent` at once, and records
/// each outcome. Cheap to clone; clones share the same registry.
pub struct TransferScheduler<P, M> {
    shared: Arc<Shared<P, M>>,
    max_concurrent: usize,
    task_timeout: Option<Duration>,
}

impl<P, M> Clone for TransferScheduler<P, M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            max_concurrent: self.max_concurrent,
            task_timeout: self.task_timeout,
        }
    }
}

impl<P, M> TransferScheduler<P, M>
where
    P: Clone + Send + 'static,
    M: Clone + Send + 'static,
{
    /// Scheduler without a progress sink. `max_concurrent` below 1 is raised to 1.
    pub fn new(max_concurrent: usize) -> Self {
        Self::build(max_concurrent, None)
    }

    /// Scheduler that notifies `sink` after every enqueue and every status or
    /// progress change.
    pub fn with_sink(max_concurrent: usize, sink: impl ProgressSink<P, M> + 'static) -> Self {
        Self::build(max_concurrent, Some(Arc::new(sink)))
    }

    fn build(max_concurrent: usize, sink: Option<Arc<dyn ProgressSink<P, M>>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(TaskRegistry::new()),
                sink,
                wake: Notify::new(),
                running: AtomicBool::new(false),
            }),
            max_concurrent: max_concurrent.max(1),
            task_timeout: None,
        }
    }

    /// Fail any transfer that has not settled within `timeout`.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Queue a transfer. The task starts `Pending` and is admitted in FIFO order.
    pub fn enqueue(&self, payload: P, metadata: M) -> TaskId {
        let id = self.shared.mutate(|registry| {
            let (id, event) = registry.enqueue(payload, metadata);
            (id, Some(event))
        });
        self.shared.wake.notify_one();
        tracing::debug!(task = %id, "enqueued transfer");
        id
    }

    /// Remove a task that has not started yet.
    pub fn remove(&self, id: TaskId) -> Result<(), SchedulerError> {
        self.shared.mutate(|registry| (registry.remove(id), None))?;
        tracing::debug!(task = %id, "removed pending transfer");
        Ok(())
    }

    /// Record progress for a running task. Clamped to 100, never decreases, and
    /// ignored for tasks that are not running. Returns true if it changed.
    pub fn update_progress(&self, id: TaskId, percent: u32) -> bool {
        self.shared.update(id, percent)
    }

    /// Point-in-time copy of every task, in enqueue order.
    pub fn snapshot(&self) -> Vec<Task<P, M>> {
        self.shared.lock().snapshot()
    }

    pub fn task(&self, id: TaskId) -> Option<Task<P, M>> {
        self.shared.lock().get(id).cloned()
    }

    /// Drop every task that is not running; returns how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = self.shared.mutate(|registry| (registry.clear(), None));
        tracing::debug!(dropped, "cleared transfer registry");
        dropped
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().is_empty()
    }

    pub fn summary(&self) -> BatchSummary {
        self.shared.lock().summary()
    }

    pub fn overall_progress(&self) -> u8 {
        self.shared.lock().overall_progress()
    }

    /// Number of tasks currently executing.
    pub fn active_count(&self) -> usize {
        self.shared.lock().active_len()
    }

    /// Number of tasks waiting for admission.
    pub fn queued_count(&self) -> usize {
        self.shared.lock().queued_len()
    }

    /// Drive every queued task to a terminal state using `executor`.
    ///
    /// Returns once the queue and the active set are both empty. Transfer
    /// failures are recorded on their tasks; the only error is a second
    /// concurrent `run` on the same scheduler.
    pub async fn run<E>(&self, executor: E) -> Result<BatchSummary, SchedulerError>
    where
        E: TransferExecutor<P, M> + 'static,
    {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.shared.running);

        let executor = Arc::new(executor);
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.len() < self.max_concurrent {
                let Some(task) = self.admit_next() else {
                    break;
                };
                let id = task.id;
                let slots_used = in_flight.len() + 1;
                tracing::debug!(task = %id, slots_used, "starting transfer");
                let target: Arc<dyn ProgressTarget> = self.shared.clone();
                let progress = ProgressReporter::new(id, target);
                let executor = Arc::clone(&executor);
                let timeout = self.task_timeout;
                let mut settlement = Settlement {
                    shared: Arc::clone(&self.shared),
                    id,
                    outcome: None,
                };
                in_flight.spawn(async move {
                    settlement.outcome = Some(invoke(executor, task, progress, timeout).await);
                });
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                // The wrapper settles its own task, so a join error only
                // needs reporting.
                joined = in_flight.join_next() => {
                    if let Some(Err(e)) = joined {
                        tracing::error!("transfer task join: {}", e);
                    }
                }
                // Enqueued while every started transfer is still running; loop
                // round to admit it if there is a free slot.
                _ = self.shared.wake.notified() => {}
            }
        }

        let summary = self.summary();
        tracing::info!("transfer batch finished: {}", summary);
        Ok(summary)
    }

    fn admit_next(&self) -> Option<Task<P, M>> {
        self.shared.mutate(|registry| match registry.admit_next() {
            Some(id) => (registry.get(id).cloned(), Some(TransferEvent::Started { id })),
            None => (None, None),
        })
    }
}

/// Run one executor call in its own task so a panic or a missed deadline is
/// caught here and reported as a failure message. The error is rendered inside
/// that task too, since a user `Display` impl may panic.
async fn invoke<P, M, E>(
    executor: Arc<E>,
    task: Task<P, M>,
    progress: ProgressReporter,
    timeout: Option<Duration>,
) -> Result<(), String>
where
    P: Send + 'static,
    M: Send + 'static,
    E: TransferExecutor<P, M> + 'static,
{
    let mut handle = AbortOnDrop(tokio::spawn(async move {
        executor
            .execute(task, progress)
            .await
            .map_err(|err| format!("{err:#}"))
    }));

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle.0).await {
            Ok(joined) => joined,
            Err(_) => {
                // Wait for the cancelled executor to be dropped so its cleanup
                // has run before the task is marked failed.
                handle.0.abort();
                let _ = (&mut handle.0).await;
                return Err(format!("transfer timed out after {:?}", limit));
            }
        },
        None => (&mut handle.0).await,
    };

    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(format!(
            "transfer panicked: {}",
            panic_message(e.into_panic())
        )),
        Err(e) => Err(format!("transfer aborted: {e}")),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
