//! Collaborator ports: storage backend, identity provider, event gate.

use async_trait::async_trait;

use crate::domain::{EventId, PayloadMeta, TaskId, UploadError, UserId};

/// One upload request. `task_id` is the idempotency key.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub task_id: TaskId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub payload: Vec<u8>,
    pub meta: PayloadMeta,
}

/// Object-storage / API backend.
///
/// Implementations must accept a given `task_id` at most once and answer
/// later duplicates with success, and must map every failure onto an
/// `UploadErrorKind`.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    async fn upload(&self, request: UploadRequest) -> Result<(), UploadError>;
}

/// Who is capturing. Only used to attribute uploads.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user_id(&self) -> Result<UserId, String>;
}

/// The event entity's capture policy, checked at enqueue time.
#[async_trait]
pub trait CaptureGate: Send + Sync {
    async fn is_capture_allowed(&self, event_id: &EventId) -> bool;
}
