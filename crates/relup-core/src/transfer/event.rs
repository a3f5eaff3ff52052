//! Structured events delivered to the progress sink alongside each snapshot.

use super::task::TaskId;

/// What changed in the registry to trigger a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Enqueued { id: TaskId },
    Started { id: TaskId },
    ProgressUpdated { id: TaskId, percent: u8 },
    Completed { id: TaskId },
    Failed { id: TaskId, message: String },
}

impl TransferEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            TransferEvent::Enqueued { id }
            | TransferEvent::Started { id }
            | TransferEvent::ProgressUpdated { id, .. }
            | TransferEvent::Completed { id }
            | TransferEvent::Failed { id, .. } => *id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferEvent::Completed { .. } | TransferEvent::Failed { .. }
        )
    }
}
