//! Event Types - what observers of a task are told

use crate::task::{TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Notification published on a task's channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEvent {
    /// The externally visible status changed
    StatusChanged { task_id: TaskId, status: TaskStatus },

    /// An event received from the session stream, verbatim
    Raw { task_id: TaskId, event: Value },
}

impl TaskEvent {
    pub fn status(task_id: TaskId, status: TaskStatus) -> Self {
        Self::StatusChanged { task_id, status }
    }

    pub fn raw(task_id: TaskId, event: Value) -> Self {
        Self::Raw { task_id, event }
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            Self::StatusChanged { task_id, .. } | Self::Raw { task_id, .. } => *task_id,
        }
    }

    /// Short label, e.g. for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::Raw { .. } => "raw",
        }
    }

    /// The new status, for status notifications
    pub fn as_status(&self) -> Option<TaskStatus> {
        match self {
            Self::StatusChanged { status, .. } => Some(*status),
            Self::Raw { .. } => None,
        }
    }
}
