//! Crash-safe file replacement shared by the file-backed stores.
//!
//! - write to a hidden sibling temp file
//! - fsync the temp file
//! - rename it over the destination (atomic on POSIX filesystems)
//! - best-effort fsync of the parent directory so the rename itself is durable

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

use crate::domain::StoreError;

const TEMP_MARKER: &str = ".tmp-";

fn parent_of(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent_of(path).join(format!(".{file_name}{TEMP_MARKER}{}", Ulid::new()))
}

async fn write_and_sync(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = temp_path_for(path);

    let mut file = File::create(&tmp)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    if let Err(e) = write_and_sync(&mut file, bytes).await {
        drop(file);
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StoreError::io(&tmp, e));
    }
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StoreError::io(path, e));
    }

    if let Ok(dir) = File::open(parent_of(path)).await {
        let _ = dir.sync_all().await;
    }

    Ok(())
}

/// Is this a temp file left behind by `write_atomic`?
pub(crate) fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.contains(TEMP_MARKER)
}

/// Delete temp files left by writes that were interrupted by a crash.
pub(crate) async fn sweep_temp_files(root: &Path) -> Result<usize, StoreError> {
    let mut entries = tokio::fs::read_dir(root)
        .await
        .map_err(|e| StoreError::io(root, e))?;

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io(root, e))?
    {
        let name = entry.file_name();
        if is_temp_file(&name.to_string_lossy()) {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = %entry.path().display(), error = %e, "failed to remove stale temp file"),
            }
        }
    }
    Ok(removed)
}
