//! App - application layer
//!
//! Combines the ports, the controller and the worker pool into a running pipeline.
//!
//! # Components
//! - **PipelineBuilder**: wiring, startup validation and recovery
//! - **Pipeline**: enqueue / retry / counts / events surface, graceful shutdown
//! - **WorkerGroup**: bounded upload workers
//! - **OutcomeLoop**: worker reports -> controller
//! - **TriggerLoop**: platform triggers -> drain
//! - **RetryTimer**: drain when the earliest backoff elapses
//! - **RetentionLoop**: pruning of uploaded tasks

pub mod builder;
pub mod outcome_loop;
pub mod pipeline;
pub mod retention_loop;
pub mod retry_timer;
pub mod trigger_loop;
pub mod worker_loop;

pub use self::builder::{BuildError, PipelineBuilder};
pub use self::pipeline::Pipeline;
pub use self::worker_loop::{AttemptReport, WorkerContext, WorkerGroup};
