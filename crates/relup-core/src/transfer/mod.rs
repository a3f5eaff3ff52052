//! Transfer scheduler.
//!
//! Admits independent transfer tasks in FIFO order, runs at most
//! `max_concurrent` at once through an injected [`TransferExecutor`], and
//! records each outcome in a registry that a [`ProgressSink`] observes.
//! A failing transfer is recorded on its own task and never stops the batch.

mod error;
mod event;
mod executor;
mod progress;
mod registry;
mod scheduler;
mod task;

pub use error::SchedulerError;
pub use event::TransferEvent;
pub use executor::{FnExecutor, ProgressReporter, TransferExecutor};
pub use progress::{overall_progress, BatchSummary, ChannelSink, ProgressSink, ProgressUpdate};
pub use scheduler::TransferScheduler;
pub use task::{Task, TaskId, TaskStatus};
