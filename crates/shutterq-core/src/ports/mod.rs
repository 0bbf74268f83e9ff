//! Ports: traits at every seam between the pipeline and the outside world.
//!
//! Durable storage, the backend, identity, the event entity, time, id
//! generation and platform triggers are all reached through these traits, so
//! the controller can run against in-memory fakes in tests and against the
//! file-backed adapters in `impls` in production.

pub mod backend;
pub mod clock;
pub mod id_generator;
pub mod payload_store;
pub mod task_store;
pub mod trigger;

pub use self::backend::{CaptureGate, IdentityProvider, UploadBackend, UploadRequest};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::payload_store::PayloadStore;
pub use self::task_store::TaskStore;
pub use self::trigger::{Trigger, TriggerSource};
