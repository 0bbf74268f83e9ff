//! TaskStore port: the durable table of upload tasks.
//!
//! The store is the single source of truth for what still needs to happen.
//! It is deliberately dumb: it upserts and lists records, and never decides a
//! status itself. Only the queue controller writes to it, one operation at a
//! time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{StoreError, TaskId, TaskStatus, UploadTask};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Upsert a record atomically: after a crash either the old or the new
    /// version is visible, never a torn write.
    async fn put(&self, task: &UploadTask) -> Result<(), StoreError>;

    async fn get(&self, id: &TaskId) -> Result<Option<UploadTask>, StoreError>;

    /// Every readable record, in no particular order.
    async fn list(&self) -> Result<Vec<UploadTask>, StoreError>;

    /// Pending tasks whose backoff has elapsed, plus every `uploading` task.
    async fn list_eligible(&self, now: DateTime<Utc>) -> Result<Vec<UploadTask>, StoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|t| t.is_eligible(now) || t.status == TaskStatus::Uploading)
            .collect())
    }

    /// Delete a record. Removing a missing id is not an error.
    async fn remove(&self, id: &TaskId) -> Result<(), StoreError>;
}
