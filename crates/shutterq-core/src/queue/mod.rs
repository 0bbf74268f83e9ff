//! Queue: the status controller and the retry policy it applies.

mod controller;
mod retry;

pub use controller::{Capture, ClaimedTask, ControllerPorts, EVENT_BUFFER, QueueController};
pub use retry::RetryPolicy;
