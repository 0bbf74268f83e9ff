//! Pipeline - the running upload pipeline
//!
//! Owns the controller, the worker group and the background loops started
//! by `PipelineBuilder::start`. This is the surface the capture layer and UI
//! talk to.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::worker_loop::WorkerGroup;
use crate::domain::{EnqueueError, EventId, PipelineError, TaskEvent, TaskId, UploadTask};
use crate::observability::QueueCounts;
use crate::queue::{Capture, QueueController};

pub struct Pipeline {
    pub(super) controller: Arc<QueueController>,
    pub(super) drain_on_enqueue: bool,
    pub(super) shutdown_tx: watch::Sender<bool>,
    pub(super) workers: WorkerGroup,
    pub(super) loops: Vec<JoinHandle<()>>,
    pub(super) outcome_loop: JoinHandle<()>,
}

impl Pipeline {
    /// Transform and persist a capture. Returns once it is durably queued;
    /// never waits on the network.
    pub async fn enqueue(&self, raw: Vec<u8>, event_id: EventId) -> Result<TaskId, EnqueueError> {
        let id = self.controller.enqueue(raw, event_id).await?;
        self.after_enqueue().await;
        Ok(id)
    }

    /// Like [`Pipeline::enqueue`], with a capture id chosen by the caller.
    pub async fn enqueue_capture(&self, capture: Capture) -> Result<TaskId, EnqueueError> {
        let id = self.controller.enqueue_capture(capture).await?;
        self.after_enqueue().await;
        Ok(id)
    }

    async fn after_enqueue(&self) {
        if !self.drain_on_enqueue {
            return;
        }
        // the task is already persisted; a failed drain is retried by the next trigger
        if let Err(e) = self.controller.drain().await {
            warn!(error = %e, "drain after enqueue failed");
        }
    }

    pub async fn drain(&self) -> Result<usize, PipelineError> {
        self.controller.drain().await
    }

    pub async fn retry_failed(&self, task_id: TaskId) -> Result<bool, PipelineError> {
        let reset = self.controller.retry_failed(task_id).await?;
        if reset {
            self.controller.drain().await?;
        }
        Ok(reset)
    }

    pub async fn retry_all_failed(&self) -> Result<usize, PipelineError> {
        let reset = self.controller.retry_all_failed().await?;
        if reset > 0 {
            self.controller.drain().await?;
        }
        Ok(reset)
    }

    pub async fn counts(&self) -> Result<QueueCounts, PipelineError> {
        self.controller.counts().await
    }

    pub async fn pending_count(&self) -> Result<usize, PipelineError> {
        self.controller.pending_count().await
    }

    pub async fn failed_count(&self) -> Result<usize, PipelineError> {
        self.controller.failed_count().await
    }

    pub async fn task(&self, task_id: TaskId) -> Result<Option<UploadTask>, PipelineError> {
        self.controller.task(task_id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.controller.subscribe()
    }

    pub fn controller(&self) -> &Arc<QueueController> {
        &self.controller
    }

    /// Stop triggers and timers, let running uploads finish and record
    /// their outcomes, then return. Tasks claimed but not yet started stay
    /// `uploading` on disk and are recovered by the next start.
    pub async fn shutdown(self) {
        info!("pipeline shutting down");
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);

        self.workers.shutdown_and_join().await;
        if let Err(e) = self.outcome_loop.await {
            warn!(error = %e, "outcome loop panicked");
        }
        for join in self.loops {
            if let Err(e) = join.await {
                warn!(error = %e, "background loop panicked");
            }
        }
        info!("pipeline stopped");
    }
}
