use serde::{Deserialize, Serialize};

use crate::domain::{TaskStatus, UploadTask};

/// Per-status task counts, for UI badges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub uploading: usize,
    pub uploaded: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a UploadTask>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Uploading => counts.uploading += 1,
                TaskStatus::Uploaded => counts.uploaded += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.uploading + self.uploaded + self.failed
    }

    /// Nothing left for the pipeline to do on its own.
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.uploading == 0
    }
}
