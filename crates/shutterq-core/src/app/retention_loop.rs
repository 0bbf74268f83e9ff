//! RetentionLoop - prunes uploaded tasks
//!
//! # Flow
//! 1. every `sweep_every`, find `uploaded` tasks with `uploaded_at + retention <= now`
//! 2. delete the payload
//! 3. delete the record

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use crate::queue::QueueController;

pub struct RetentionLoop {
    controller: Arc<QueueController>,
    retention: Duration,
    sweep_every: Duration,
}

impl RetentionLoop {
    pub fn new(controller: Arc<QueueController>, retention: Duration, sweep_every: Duration) -> Self {
        Self {
            controller,
            retention,
            sweep_every,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.sweep_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.controller.prune_uploaded(self.retention).await {
                        warn!(error = %e, "retention sweep failed");
                    }
                }
            }
        }
    }
}
