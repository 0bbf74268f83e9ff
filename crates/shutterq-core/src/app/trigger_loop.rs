//! TriggerLoop - turns platform signals into drains
//!
//! `ManualRetry` resets failed tasks first; every other trigger just drains.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::PipelineError;
use crate::ports::{Trigger, TriggerSource};
use crate::queue::QueueController;

pub struct TriggerLoop {
    controller: Arc<QueueController>,
    source: Box<dyn TriggerSource>,
}

impl TriggerLoop {
    pub fn new(controller: Arc<QueueController>, source: Box<dyn TriggerSource>) -> Self {
        Self { controller, source }
    }

    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let trigger = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                trigger = self.source.next() => trigger,
            };

            let Some(trigger) = trigger else {
                debug!("trigger source closed");
                break;
            };

            if let Err(e) = self.handle(trigger).await {
                warn!(?trigger, error = %e, "trigger handling failed");
            }
        }
    }

    async fn handle(&self, trigger: Trigger) -> Result<(), PipelineError> {
        let reset = match trigger {
            Trigger::ManualRetry => self.controller.retry_all_failed().await?,
            Trigger::ConnectivityRestored | Trigger::Foreground => 0,
        };
        let dispatched = self.controller.drain().await?;
        info!(?trigger, reset, dispatched, "trigger handled");
        Ok(())
    }
}
