//! Impls - port implementations
//!
//! # Included
//! - **FileTaskStore** / **FilePayloadStore**: app-local durable storage
//! - **InMemoryTaskStore** / **InMemoryPayloadStore**: tests and ephemeral sessions
//! - **ChannelTrigger**: platform callbacks -> `TriggerSource`
//!
//! The upload backend, identity provider and capture gate are app-specific
//! and live with the host application.

mod atomic;
pub mod channel_trigger;
pub mod file_payload_store;
pub mod file_task_store;
pub mod memory;

pub use self::channel_trigger::{ChannelTrigger, TriggerHandle, channel_trigger};
pub use self::file_payload_store::FilePayloadStore;
pub use self::file_task_store::FileTaskStore;
pub use self::memory::{InMemoryPayloadStore, InMemoryTaskStore};
