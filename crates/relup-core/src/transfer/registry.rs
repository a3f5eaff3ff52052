//! Task registry: the single source of truth for task state in a batch.
//!
//! Holds every task keyed by id, the FIFO admission queue (ids only) and the
//! active set. All transitions happen here; the scheduler wraps it in a lock.

use std::collections::{BTreeMap, HashSet, VecDeque};

use super::error::SchedulerError;
use super::event::TransferEvent;
use super::progress::{overall_progress, BatchSummary};
use super::task::{Task, TaskId, TaskStatus};

#[derive(Debug)]
pub(crate) struct TaskRegistry<P, M> {
    /// Ids grow monotonically, so key order is insertion order.
    tasks: BTreeMap<TaskId, Task<P, M>>,
    queue: VecDeque<TaskId>,
    active: HashSet<TaskId>,
    next_id: u64,
}

impl<P, M> TaskRegistry<P, M> {
    pub(crate) fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            queue: VecDeque::new(),
            active: HashSet::new(),
            next_id: 1,
        }
    }

    pub(crate) fn enqueue(&mut self, payload: P, metadata: M) -> (TaskId, TransferEvent) {
        let id = TaskId::new(self.next_id);
        self.next_id += 1;
        self.tasks.insert(id, Task::new(id, payload, metadata));
        self.queue.push_back(id);
        (id, TransferEvent::Enqueued { id })
    }

    pub(crate) fn remove(&mut self, id: TaskId) -> Result<(), SchedulerError> {
        let task = self.tasks.get(&id).ok_or(SchedulerError::UnknownTask(id))?;
        if task.status != TaskStatus::Pending {
            return Err(SchedulerError::InvalidState {
                id,
                status: task.status,
            });
        }
        self.tasks.remove(&id);
        self.queue.retain(|queued| *queued != id);
        Ok(())
    }

    /// Pop the head of the admission queue and mark it running. Returns `None`
    /// when the queue is empty.
    pub(crate) fn admit_next(&mut self) -> Option<TaskId> {
        while let Some(id) = self.queue.pop_front() {
            if let Some(task) = self.tasks.get_mut(&id) {
                task.start();
                self.active.insert(id);
                return Some(id);
            }
        }
        None
    }

    /// Record the executor outcome for a running task. Returns `None` if the
    /// task is unknown or not running (terminal tasks are never touched again).
    pub(crate) fn settle(
        &mut self,
        id: TaskId,
        outcome: Result<(), String>,
    ) -> Option<TransferEvent> {
        let task = self.tasks.get_mut(&id)?;
        if task.status != TaskStatus::Running {
            return None;
        }
        self.active.remove(&id);
        Some(match outcome {
            Ok(()) => {
                task.complete();
                TransferEvent::Completed { id }
            }
            Err(message) => {
                task.fail(message.clone());
                TransferEvent::Failed { id, message }
            }
        })
    }

    pub(crate) fn update_progress(&mut self, id: TaskId, percent: u32) -> Option<TransferEvent> {
        let task = self.tasks.get_mut(&id)?;
        task.advance(percent).then(|| TransferEvent::ProgressUpdated {
            id,
            percent: task.progress,
        })
    }

    /// Drop every task that is not running. Running tasks stay so the active
    /// set and the tasks it refers to remain consistent.
    pub(crate) fn clear(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, t| t.status == TaskStatus::Running);
        self.queue.clear();
        before - self.tasks.len()
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<&Task<P, M>> {
        self.tasks.get(&id)
    }

    pub(crate) fn active_len(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn summary(&self) -> BatchSummary {
        BatchSummary::from_tasks(self.tasks.values())
    }

    pub(crate) fn overall_progress(&self) -> u8 {
        overall_progress(self.tasks.values())
    }
}

impl<P: Clone, M: Clone> TaskRegistry<P, M> {
    pub(crate) fn snapshot(&self) -> Vec<Task<P, M>> {
        self.tasks.values().cloned().collect()
    }
}
