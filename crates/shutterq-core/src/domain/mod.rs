//! Domain model: ids, upload tasks, outcomes, decisions, events, errors.

pub mod decision;
pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod task;

pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{EnqueueError, PipelineError, StoreError};
pub use events::TaskEvent;
pub use ids::{EventId, TaskId, UserId};
pub use outcome::{ErrorClass, UploadError, UploadErrorKind, UploadOutcome};
pub use task::{PayloadMeta, PayloadRef, TaskStatus, TransitionError, UploadTask};
