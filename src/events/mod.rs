//! Typed publish/subscribe: the bus and its buffering policies.
//!
//! This module groups the event **bus** shared infrastructure and the closed
//! set of per-subscription **buffering policies**.
//!
//! ## Contents
//! - [`EventBus`] typed broadcast with per-subscriber delivery workers
//! - [`BufferingPolicy`] Unbounded / LatestOnly / DropNew
//! - [`SubscriptionHandle`] registration handle
//!
//! Buses are shared, multi-writer structures with their own internal
//! synchronization; they are owned by whichever long-lived component creates
//! them (a domain manager, a playback entry, the configuration propagator)
//! and are independent of any single instance's scheduling queue.

mod bus;
mod policy;

pub use bus::{EventBus, SubscriptionHandle};
pub use policy::BufferingPolicy;
