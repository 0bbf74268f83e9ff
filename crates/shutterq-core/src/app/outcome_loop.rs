//! OutcomeLoop - applies worker reports to the queue
//!
//! # Flow
//! 1. receive an `AttemptReport`
//! 2. `QueueController::report_outcome`
//! 3. drain, since the report freed a slot (skipped once shutdown starts)
//!
//! Runs until every worker has dropped its report sender, so reports from
//! uploads that finish during shutdown are still persisted.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

use super::worker_loop::AttemptReport;
use crate::queue::QueueController;

pub struct OutcomeLoop {
    controller: Arc<QueueController>,
    reports: mpsc::UnboundedReceiver<AttemptReport>,
}

impl OutcomeLoop {
    pub fn new(
        controller: Arc<QueueController>,
        reports: mpsc::UnboundedReceiver<AttemptReport>,
    ) -> Self {
        Self {
            controller,
            reports,
        }
    }

    pub async fn run(mut self, shutdown_rx: watch::Receiver<bool>) {
        while let Some(AttemptReport { task_id, outcome }) = self.reports.recv().await {
            if let Err(e) = self.controller.report_outcome(task_id, outcome).await {
                error!(task_id = %task_id, error = %e, "failed to record upload outcome");
            }

            if *shutdown_rx.borrow() {
                continue;
            }
            if let Err(e) = self.controller.drain().await {
                error!(error = %e, "drain after outcome failed");
            }
        }
        debug!("outcome loop stopped");
    }
}
