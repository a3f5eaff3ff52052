//! Progress reporting for a transfer batch.
//!
//! The sink receives the whole snapshot on every change rather than a delta;
//! consumers that need edge-triggered behaviour diff it themselves or match on
//! the accompanying [`TransferEvent`].

use std::fmt;

use tokio::sync::mpsc;

use super::event::TransferEvent;
use super::task::{Task, TaskStatus};

/// Observer invoked after every enqueue and every status/progress mutation.
///
/// Runs while the registry lock is held so notifications are totally ordered;
/// implementations must be quick and must not call back into the scheduler.
pub trait ProgressSink<P, M>: Send + Sync {
    fn notify(&self, event: &TransferEvent, snapshot: &[Task<P, M>]);
}

impl<P, M, F> ProgressSink<P, M> for F
where
    F: Fn(&TransferEvent, &[Task<P, M>]) + Send + Sync,
{
    fn notify(&self, event: &TransferEvent, snapshot: &[Task<P, M>]) {
        self(event, snapshot)
    }
}

/// One notification as delivered through a [`ChannelSink`].
#[derive(Debug, Clone)]
pub struct ProgressUpdate<P, M> {
    pub event: TransferEvent,
    pub snapshot: Vec<Task<P, M>>,
}

/// Sink that forwards every notification into an unbounded tokio channel, for
/// consumers that render on their own task.
pub struct ChannelSink<P, M> {
    tx: mpsc::UnboundedSender<ProgressUpdate<P, M>>,
}

impl<P, M> ChannelSink<P, M> {
    /// Sink plus the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate<P, M>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl<P, M> ProgressSink<P, M> for ChannelSink<P, M>
where
    P: Clone + Send,
    M: Clone + Send,
{
    fn notify(&self, event: &TransferEvent, snapshot: &[Task<P, M>]) {
        // Receiver gone means nobody is rendering; the batch keeps going.
        let _ = self.tx.send(ProgressUpdate {
            event: event.clone(),
            snapshot: snapshot.to_vec(),
        });
    }
}

/// Rounded mean of every task's progress (0 for an empty batch).
pub fn overall_progress<'a, P: 'a, M: 'a>(tasks: impl IntoIterator<Item = &'a Task<P, M>>) -> u8 {
    let (count, total) = tasks
        .into_iter()
        .fold((0u64, 0u64), |(n, sum), t| (n + 1, sum + u64::from(t.progress)));
    if count == 0 {
        return 0;
    }
    (total as f64 / count as f64).round() as u8
}

/// Per-status counts for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_tasks<'a, P: 'a, M: 'a>(tasks: impl IntoIterator<Item = &'a Task<P, M>>) -> Self {
        let mut summary = BatchSummary::default();
        for t in tasks {
            summary.total += 1;
            match t.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    /// True when nothing is left pending or running.
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.running == 0
    }

    pub fn all_succeeded(&self) -> bool {
        self.is_settled() && self.failed == 0
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} succeeded", self.completed, self.total)?;
        if self.failed > 0 {
            write!(f, " ({} failed)", self.failed)?;
        }
        Ok(())
    }
}
