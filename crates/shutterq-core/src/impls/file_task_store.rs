//! FileTaskStore: one JSON document per task in an app-local directory.
//!
//! Layout: `<root>/task-<ULID>.json`. Records are replaced with
//! `write_atomic`, so a crash mid-write leaves the previous version intact.
//! A record that cannot be parsed is logged and skipped by listings rather
//! than aborting startup recovery for every other task.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::atomic::{is_temp_file, sweep_temp_files, write_atomic};
use crate::domain::{StoreError, TaskId, UploadTask};
use crate::ports::TaskStore;

const RECORD_EXTENSION: &str = ".json";

#[derive(Debug, Clone)]
pub struct FileTaskStore {
    root: PathBuf,
}

impl FileTaskStore {
    /// Open (creating if needed) the store at `root` and clear interrupted writes.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::io(&root, e))?;

        let swept = sweep_temp_files(&root).await?;
        if swept > 0 {
            debug!(root = %root.display(), swept, "removed interrupted task writes");
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &TaskId) -> PathBuf {
        self.root.join(format!("{id}{RECORD_EXTENSION}"))
    }

    async fn read_record(path: &Path) -> Result<Option<UploadTask>, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn put(&self, task: &UploadTask) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(task).map_err(|source| StoreError::Serialize {
            task_id: task.id,
            source,
        })?;
        write_atomic(&self.path_for(&task.id), &bytes).await
    }

    async fn get(&self, id: &TaskId) -> Result<Option<UploadTask>, StoreError> {
        Self::read_record(&self.path_for(id)).await
    }

    async fn list(&self) -> Result<Vec<UploadTask>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;

        let mut tasks = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if is_temp_file(&name) || !name.ends_with(RECORD_EXTENSION) {
                continue;
            }

            match Self::read_record(&entry.path()).await {
                Ok(Some(task)) => tasks.push(task),
                // removed between read_dir and read
                Ok(None) => {}
                Err(e) => warn!(error = %e, "skipping unreadable task record"),
            }
        }
        Ok(tasks)
    }

    async fn remove(&self, id: &TaskId) -> Result<(), StoreError> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskStatus, UploadError, UploadErrorKind};
    use crate::testing::{sample_task, t0};
    use chrono::Duration;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();
        let task = sample_task("evt-1");

        store.put(&task).await.unwrap();

        assert_eq!(store.get(&task.id).await.unwrap(), Some(task.clone()));
        assert!(dir.path().join(format!("{}.json", task.id)).exists());
    }

    #[tokio::test]
    async fn put_overwrites_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();
        let mut task = sample_task("evt-1");
        store.put(&task).await.unwrap();

        task.start_upload(t0()).unwrap();
        store.put(&task).await.unwrap();

        let stored = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Uploading);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_missing_is_none_and_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();
        let task = sample_task("evt-1");

        assert_eq!(store.get(&task.id).await.unwrap(), None);
        store.remove(&task.id).await.unwrap();
    }

    #[tokio::test]
    async fn list_eligible_filters_backoff_and_includes_uploading() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();

        let ready = sample_task("evt-1");

        let mut backing_off = sample_task("evt-1");
        backing_off.start_upload(t0()).unwrap();
        backing_off.record_attempt().unwrap();
        backing_off
            .schedule_retry(
                t0() + Duration::seconds(10),
                UploadError::new(UploadErrorKind::Timeout, "slow"),
                t0(),
            )
            .unwrap();

        let mut in_flight = sample_task("evt-1");
        in_flight.start_upload(t0()).unwrap();

        let mut done = sample_task("evt-1");
        done.start_upload(t0()).unwrap();
        done.mark_uploaded(t0()).unwrap();

        for t in [&ready, &backing_off, &in_flight, &done] {
            store.put(t).await.unwrap();
        }

        let mut eligible: Vec<_> = store
            .list_eligible(t0())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        eligible.sort();
        let mut expected = vec![ready.id, in_flight.id];
        expected.sort();
        assert_eq!(eligible, expected);

        let later = store.list_eligible(t0() + Duration::seconds(10)).await.unwrap();
        assert_eq!(later.len(), 3);
    }

    #[tokio::test]
    async fn corrupt_records_are_skipped_by_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();
        let task = sample_task("evt-1");
        store.put(&task).await.unwrap();

        std::fs::write(dir.path().join("task-garbage.json"), b"{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let tasks = store.list().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, task.id);
    }

    #[tokio::test]
    async fn reopening_sweeps_interrupted_writes() {
        let dir = tempfile::tempdir().unwrap();
        let task = sample_task("evt-1");
        {
            let store = FileTaskStore::open(dir.path()).await.unwrap();
            store.put(&task).await.unwrap();
        }
        let stale = dir.path().join(format!(".{}.json.tmp-01J00000000000000000000000", task.id));
        std::fs::write(&stale, b"{\"half\":").unwrap();

        let store = FileTaskStore::open(dir.path()).await.unwrap();

        assert!(!stale.exists());
        assert_eq!(store.get(&task.id).await.unwrap(), Some(task));
    }
}
