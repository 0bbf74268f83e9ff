//! Channel-backed TriggerSource.
//!
//! Platform glue keeps a `TriggerHandle` and calls it from reachability or
//! lifecycle callbacks; the pipeline owns the `ChannelTrigger` end. Firing
//! never blocks: when the buffer is full a drain is already queued, so the
//! extra trigger is dropped.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::ports::{Trigger, TriggerSource};

pub fn channel_trigger(buffer: usize) -> (TriggerHandle, ChannelTrigger) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (TriggerHandle { tx }, ChannelTrigger { rx })
}

#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<Trigger>,
}

impl TriggerHandle {
    /// Returns `false` if the trigger was coalesced or the pipeline is gone.
    pub fn fire(&self, trigger: Trigger) -> bool {
        match self.tx.try_send(trigger) {
            Ok(()) => true,
            Err(e) => {
                trace!(?trigger, error = %e, "trigger dropped");
                false
            }
        }
    }

    pub fn on_connectivity_restored(&self) -> bool {
        self.fire(Trigger::ConnectivityRestored)
    }

    pub fn on_foreground(&self) -> bool {
        self.fire(Trigger::Foreground)
    }

    pub fn on_manual_retry(&self) -> bool {
        self.fire(Trigger::ManualRetry)
    }
}

#[derive(Debug)]
pub struct ChannelTrigger {
    rx: mpsc::Receiver<Trigger>,
}

#[async_trait]
impl TriggerSource for ChannelTrigger {
    async fn next(&mut self) -> Option<Trigger> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order_then_closes() {
        let (handle, mut source) = channel_trigger(4);

        assert!(handle.on_connectivity_restored());
        assert!(handle.on_manual_retry());
        drop(handle);

        assert_eq!(source.next().await, Some(Trigger::ConnectivityRestored));
        assert_eq!(source.next().await, Some(Trigger::ManualRetry));
        assert_eq!(source.next().await, None);
    }

    #[tokio::test]
    async fn full_buffer_coalesces() {
        let (handle, mut source) = channel_trigger(1);

        assert!(handle.on_foreground());
        assert!(!handle.on_foreground());

        assert_eq!(source.next().await, Some(Trigger::Foreground));
    }
}
