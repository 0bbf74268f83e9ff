//! PayloadStore port: transformed payload bytes on local durable storage.
//!
//! Task records only carry a `PayloadRef`; bytes are read back by the worker
//! right before the upload, so the queue never holds image data in memory.

use async_trait::async_trait;

use crate::domain::{PayloadRef, StoreError, TaskId};

#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Persist the payload of `task_id` and return its reference.
    /// Writing the same task id again replaces the bytes.
    async fn write(&self, task_id: &TaskId, bytes: &[u8]) -> Result<PayloadRef, StoreError>;

    async fn read(&self, payload: &PayloadRef) -> Result<Vec<u8>, StoreError>;

    /// Removing a missing payload is not an error.
    async fn remove(&self, payload: &PayloadRef) -> Result<(), StoreError>;
}
