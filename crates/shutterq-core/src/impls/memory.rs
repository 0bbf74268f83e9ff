//! In-memory stores for tests and ephemeral sessions.
//!
//! Both are cheap to clone and share their state, so a test can hand one
//! clone to the pipeline and keep another to inspect or to "restart" with.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{PayloadRef, StoreError, TaskId, UploadTask};
use crate::ports::{PayloadStore, TaskStore};

#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<Mutex<HashMap<TaskId, UploadTask>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn put(&self, task: &UploadTask) -> Result<(), StoreError> {
        self.tasks.lock().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<UploadTask>, StoreError> {
        Ok(self.tasks.lock().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<UploadTask>, StoreError> {
        Ok(self.tasks.lock().await.values().cloned().collect())
    }

    async fn remove(&self, id: &TaskId) -> Result<(), StoreError> {
        self.tasks.lock().await.remove(id);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPayloadStore {
    blobs: Arc<Mutex<HashMap<PayloadRef, Vec<u8>>>>,
}

impl InMemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.lock().await.is_empty()
    }
}

#[async_trait]
impl PayloadStore for InMemoryPayloadStore {
    async fn write(&self, task_id: &TaskId, bytes: &[u8]) -> Result<PayloadRef, StoreError> {
        let payload = PayloadRef::new(format!("mem:{task_id}"));
        self.blobs
            .lock()
            .await
            .insert(payload.clone(), bytes.to_vec());
        Ok(payload)
    }

    async fn read(&self, payload: &PayloadRef) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .lock()
            .await
            .get(payload)
            .cloned()
            .ok_or_else(|| StoreError::PayloadNotFound(payload.clone()))
    }

    async fn remove(&self, payload: &PayloadRef) -> Result<(), StoreError> {
        self.blobs.lock().await.remove(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_task;

    #[tokio::test]
    async fn task_store_clones_share_state() {
        let store = InMemoryTaskStore::new();
        let other = store.clone();
        let task = sample_task("evt-1");

        store.put(&task).await.unwrap();

        assert_eq!(other.get(&task.id).await.unwrap(), Some(task.clone()));
        other.remove(&task.id).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn payload_store_missing_ref_is_not_found() {
        let store = InMemoryPayloadStore::new();

        let result = store.read(&PayloadRef::new("mem:nope")).await;

        assert!(matches!(result, Err(StoreError::PayloadNotFound(_))));
    }
}
