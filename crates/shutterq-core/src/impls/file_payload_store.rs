//! FilePayloadStore: transformed JPEG bytes next to the task records.
//!
//! Layout: `<root>/task-<ULID>.jpg`. The `PayloadRef` is the bare file name,
//! so the data directory can be moved without rewriting task records.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::atomic::{sweep_temp_files, write_atomic};
use crate::domain::{PayloadRef, StoreError, TaskId};
use crate::ports::PayloadStore;

const PAYLOAD_EXTENSION: &str = ".jpg";

#[derive(Debug, Clone)]
pub struct FilePayloadStore {
    root: PathBuf,
}

impl FilePayloadStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io(&root, e))?;
        sweep_temp_files(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a reference to a path inside `root`. References that would
    /// escape the directory are reported as missing.
    fn resolve(&self, payload: &PayloadRef) -> Result<PathBuf, StoreError> {
        let name = payload.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(StoreError::PayloadNotFound(payload.clone()));
        }
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl PayloadStore for FilePayloadStore {
    async fn write(&self, task_id: &TaskId, bytes: &[u8]) -> Result<PayloadRef, StoreError> {
        let name = format!("{task_id}{PAYLOAD_EXTENSION}");
        write_atomic(&self.root.join(&name), bytes).await?;
        Ok(PayloadRef::new(name))
    }

    async fn read(&self, payload: &PayloadRef) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(payload)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::PayloadNotFound(payload.clone()))
            }
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn remove(&self, payload: &PayloadRef) -> Result<(), StoreError> {
        let path = match self.resolve(payload) {
            Ok(path) => path,
            Err(_) => return Ok(()),
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}
