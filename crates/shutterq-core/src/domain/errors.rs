//! Error types shared across the pipeline.

use std::path::PathBuf;

use thiserror::Error;

use super::ids::{EventId, TaskId};
use super::task::{PayloadRef, TransitionError};
use crate::transform::TransformError;

/// Durable storage failure (task records or payload bytes).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize task {task_id}: {source}")]
    Serialize {
        task_id: TaskId,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt record at {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("payload {0} not found")]
    PayloadNotFound(PayloadRef),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Synchronous rejection of a capture. Nothing is persisted when this is returned.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("event {0} does not accept captures")]
    CaptureNotAllowed(EventId),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of a controller operation other than enqueue.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("worker pool is shut down")]
    DispatchClosed,
}
