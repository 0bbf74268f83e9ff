//! Upload task record and its status state machine.
//!
//! `UploadTask` is the persisted unit of work. Every status change goes
//! through one of the transition methods below; each one checks the current
//! status and refuses anything the lifecycle does not allow:
//!
//! - Pending -> Uploading (claim)
//! - Uploading -> Uploaded
//! - Uploading -> Pending (retry with backoff, or crash recovery)
//! - Uploading -> Failed
//! - Failed -> Pending (explicit retry only, resets the attempt count)

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{EventId, TaskId};
use super::outcome::UploadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a drain once `next_eligible_at` has passed.
    Pending,

    /// Claimed by exactly one worker; persisted before the network call.
    Uploading,

    /// Accepted by the backend.
    Uploaded,

    /// Gave up; needs a manual retry.
    Failed,
}

impl TaskStatus {
    /// No automatic transition leaves a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Uploaded | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Uploading => "uploading",
            TaskStatus::Uploaded => "uploaded",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Opaque key of a transformed payload in the payload store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadRef(String);

impl PayloadRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Content metadata sent along with the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMeta {
    pub content_type: String,
    pub byte_size: u64,
    pub width: u32,
    pub height: u32,
}

/// Rejected status transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task {task_id}: cannot {action} while {from}")]
pub struct TransitionError {
    pub task_id: TaskId,
    pub from: TaskStatus,
    pub action: &'static str,
}

/// Persisted upload task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTask {
    pub id: TaskId,
    pub event_id: EventId,
    pub payload_ref: PayloadRef,
    pub payload_meta: PayloadMeta,

    /// Capture time. Ordering hint only.
    pub created_at: DateTime<Utc>,

    /// Attempts whose request actually went out.
    pub attempt_count: u32,

    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<UploadError>,

    /// Not attempted again before this instant.
    pub next_eligible_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Start of the retention window once uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl UploadTask {
    pub fn new(
        id: TaskId,
        event_id: EventId,
        payload_ref: PayloadRef,
        payload_meta: PayloadMeta,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_id,
            payload_ref,
            payload_meta,
            created_at: now,
            attempt_count: 0,
            status: TaskStatus::Pending,
            last_error: None,
            next_eligible_at: now,
            updated_at: now,
            uploaded_at: None,
        }
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.next_eligible_at <= now
    }

    fn reject(&self, action: &'static str) -> TransitionError {
        TransitionError {
            task_id: self.id,
            from: self.status,
            action,
        }
    }

    /// Claim: Pending (and eligible) -> Uploading.
    pub fn start_upload(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.is_eligible(now) {
            return Err(self.reject("claim"));
        }
        self.status = TaskStatus::Uploading;
        self.updated_at = now;
        Ok(())
    }

    /// Count an attempt whose request was sent.
    pub fn record_attempt(&mut self) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Uploading {
            return Err(self.reject("record an attempt"));
        }
        self.attempt_count += 1;
        Ok(())
    }

    pub fn mark_uploaded(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Uploading {
            return Err(self.reject("mark uploaded"));
        }
        self.status = TaskStatus::Uploaded;
        self.last_error = None;
        self.uploaded_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Back to Pending with backoff.
    pub fn schedule_retry(
        &mut self,
        next_eligible_at: DateTime<Utc>,
        error: UploadError,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Uploading {
            return Err(self.reject("schedule a retry"));
        }
        self.status = TaskStatus::Pending;
        self.next_eligible_at = next_eligible_at;
        self.last_error = Some(error);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        error: UploadError,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Uploading {
            return Err(self.reject("mark failed"));
        }
        self.status = TaskStatus::Failed;
        self.last_error = Some(error);
        self.updated_at = now;
        Ok(())
    }

    /// Manual retry of a failed task: Failed -> Pending, attempts reset.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Failed {
            return Err(self.reject("retry"));
        }
        self.status = TaskStatus::Pending;
        self.attempt_count = 0;
        self.last_error = None;
        self.next_eligible_at = now;
        self.updated_at = now;
        Ok(())
    }

    /// Startup recovery of an interrupted upload: Uploading -> Pending, eligible now.
    pub fn recover(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != TaskStatus::Uploading {
            return Err(self.reject("recover"));
        }
        self.status = TaskStatus::Pending;
        self.next_eligible_at = now;
        self.updated_at = now;
        Ok(())
    }
}
