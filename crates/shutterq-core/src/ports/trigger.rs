//! TriggerSource port: platform signals that ask the queue to drain.
//!
//! Reachability callbacks, app-foreground hooks and the "retry failed" button
//! differ per platform; the pipeline only sees this stream.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Network reachability came back.
    ConnectivityRestored,

    /// The app returned to the foreground.
    Foreground,

    /// User asked to retry failed uploads. Resets failed tasks before draining.
    ManualRetry,
}

#[async_trait]
pub trait TriggerSource: Send + Sync {
    /// Next trigger, or `None` once the source is closed.
    async fn next(&mut self) -> Option<Trigger>;
}
