//! shutterq-core
//!
//! Offline-capable media upload pipeline: captures are transformed, durably
//! queued, and uploaded by a bounded worker pool with retry, backoff and
//! crash recovery.
//!
//! # Modules
//! - **domain**: model (ids, upload task + state machine, outcomes, decisions, events, errors)
//! - **ports**: traits at the seams (TaskStore, PayloadStore, UploadBackend, Clock, ...)
//! - **impls**: file-backed and in-memory stores, channel trigger source
//! - **transform**: raw capture -> canonical JPEG payload
//! - **queue**: QueueController (single writer of task status) and RetryPolicy
//! - **app**: PipelineBuilder, Pipeline, worker pool and background loops
//! - **config**: PipelineConfig (defaults, JSON file, `SHUTTERQ_*` env)
//! - **observability**: per-status counts

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod transform;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{BuildError, Pipeline, PipelineBuilder};
pub use config::PipelineConfig;
pub use domain::{EnqueueError, EventId, PipelineError, TaskEvent, TaskId, TaskStatus, UploadTask};
pub use observability::QueueCounts;
pub use queue::Capture;
