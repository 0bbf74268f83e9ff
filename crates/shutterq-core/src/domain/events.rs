//! Task state-change events, published to UI subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EventId, TaskId};
use super::outcome::UploadError;
use super::task::{TaskStatus, UploadTask};

/// One persisted status change. `from` is `None` when the task was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub event_id: EventId,
    pub from: Option<TaskStatus>,
    pub to: TaskStatus,
    pub attempt_count: u32,
    pub last_error: Option<UploadError>,
    pub next_eligible_at: DateTime<Utc>,
}

impl TaskEvent {
    /// Snapshot of `task` after a transition out of `from`.
    pub fn transition(from: Option<TaskStatus>, task: &UploadTask) -> Self {
        Self {
            task_id: task.id,
            event_id: task.event_id.clone(),
            from,
            to: task.status,
            attempt_count: task.attempt_count,
            last_error: task.last_error.clone(),
            next_eligible_at: task.next_eligible_at,
        }
    }
}
