//! RetryTimer - drains when the earliest backoff elapses
//!
//! Sleeps until the earliest future `next_eligible_at` among pending tasks.
//! A newly scheduled retry wakes it early so it can re-arm.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::queue::QueueController;

/// Re-check interval after a store read fails.
const ERROR_RECHECK: Duration = Duration::from_secs(5);

pub struct RetryTimer {
    controller: Arc<QueueController>,
}

impl RetryTimer {
    pub fn new(controller: Arc<QueueController>) -> Self {
        Self { controller }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let wakeup = self.controller.retry_wakeup();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let rearm = wakeup.notified();
            let wait = match self.controller.next_retry_in().await {
                Ok(wait) => wait,
                Err(e) => {
                    warn!(error = %e, "cannot read next retry time");
                    Some(ERROR_RECHECK)
                }
            };

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = rearm => {}
                _ = sleep_or_park(wait) => {
                    match self.controller.drain().await {
                        Ok(dispatched) => debug!(dispatched, "retry timer fired"),
                        Err(e) => warn!(error = %e, "drain from retry timer failed"),
                    }
                }
            }
        }
    }
}

async fn sleep_or_park(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}
