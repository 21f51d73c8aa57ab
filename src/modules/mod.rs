//! Consumer modules built on the instance machinery.
//!
//! ## Contents
//! - [`playback`] queue entry with a racing one-shot completion timer
//! - [`configuration`] multi-owner setting store with change propagation
//! - [`chat`] the representative script-facing binding (adapter + bridge +
//!   queue under one workload)

pub mod chat;
pub mod configuration;
pub mod playback;

pub use chat::{
    AuditLog, ChatAuthor, ChatMessage, ChatModule, DisabledReason, MessageAttachment,
    MessageStore, PageResolver,
};
pub use configuration::{ConfigurationChange, ConfigurationKey, ConfigurationPropagator};
pub use playback::PlaybackTimerEntry;
