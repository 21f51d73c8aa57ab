//! # appvisor
//!
//! **Appvisor** hosts sandboxed, logically single-threaded application
//! instances inside a multi-threaded async host.
//!
//! Each instance owns an exclusive scheduling queue: every script-visible
//! effect of host-side concurrency is expressed as a task submitted there,
//! and one drain worker runs those tasks strictly in order, one at a time.
//! Around the queue sit a typed event bus with per-subscription buffering
//! policies, an async bridge with exactly-once settlement, an event adapter
//! that survives suspension, and the lifecycle state machine gating them all.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  Host threads                      ApplicationInstance
//!  ────────────                      ───────────────────────────────────
//!  EventBus<T> ──┐                   ┌─────────────────────────────────┐
//!   (Unbounded / │   serialize +     │ Lifecycle                       │
//!    LatestOnly /├──► EventAdapter ──┼──► SchedulingQueue              │
//!    DropNew)    │    (pause/resume) │    - FIFO, one task at a time   │
//!  ──────────────┘                   │    - gated at enqueue AND drain │
//!                                    │                                 │
//!  async work ──► AsyncBridge ───────┼──► settlement task              │
//!  (any tokio     (Pending/Settled/  │    (exactly once, in order)     │
//!   worker)        Dropped)          └─────────────────────────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! Running ──suspend()──► Suspended ──resume()──► Running
//!    │                        │
//!    └──────terminate()───────┴──► Terminated (absorbing)
//!
//! Suspended:  script tasks withheld (dropped or held, per SuspendPolicy),
//!             adapter subscriptions detached, internal tasks still run.
//! Terminated: scheduling fails fast, queued tasks cancelled, pending
//!             bridge operations Dropped, adapter registrations cleared.
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                         |
//! |-------------------|----------------------------------------------------------|--------------------------------------------|
//! | **Events**        | Typed broadcast with per-subscription buffering.         | [`EventBus`], [`BufferingPolicy`]          |
//! | **Scheduling**    | Exclusive FIFO task funnel per instance.                 | [`SchedulingQueue`], [`TaskOrigin`]        |
//! | **Bridging**      | Off-thread work, on-thread exactly-once settlement.      | [`AsyncBridge`], [`OperationHandle`]       |
//! | **Adaptation**    | Bus events delivered to script listeners, pause-aware.   | [`EventAdapter`]                           |
//! | **Lifecycle**     | Running / Suspended / Terminated with absorbing end.     | [`Lifecycle`], [`InstanceState`]           |
//! | **Errors**        | Typed errors for scheduling and module surfaces.         | [`ScheduleError`], [`ModuleError`]         |
//! | **Consumers**     | Playback timer, configuration propagation, chat binding. | [`PlaybackTimerEntry`], [`ChatModule`]     |
//!
//! ## Example
//! ```rust
//! use appvisor::{ApplicationInstance, BufferingPolicy, Config, EventBus, TaskOrigin};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let instance = ApplicationInstance::new("demo", Config::default());
//!
//!     // Adapt a domain bus into a script event and listen to it.
//!     let bus = EventBus::<u32>::new();
//!     instance.adapter().adapt_event(&bus, "counted", |v| serde_json::json!(v));
//!     instance.adapter().start_or_resume();
//!     instance.adapter().add_event_listener("counted", |payload| {
//!         println!("counted: {payload}");
//!     })?;
//!     bus.notify(1);
//!
//!     // Run something on the instance thread and get its value back.
//!     let answer = instance.schedule(TaskOrigin::Script, || 6 * 7).await?;
//!     assert_eq!(answer, 42);
//!
//!     instance.terminate();
//!     Ok(())
//! }
//! ```
mod config;
mod error;
mod events;
mod instance;
mod modules;

// ---- Public re-exports ----

pub use config::Config;
pub use error::{ModuleError, ScheduleError};
pub use events::{BufferingPolicy, EventBus, SubscriptionHandle};
pub use instance::{
    ApplicationInstance, AsyncBridge, EventAdapter, InstanceState, Lifecycle, ListenerId,
    OperationHandle, OperationState, SchedulingQueue, SuspendPolicy, TaskOrigin,
};
pub use modules::{
    AuditLog, ChatAuthor, ChatMessage, ChatModule, ConfigurationChange, ConfigurationKey,
    ConfigurationPropagator, DisabledReason, MessageAttachment, MessageStore, PageResolver,
    PlaybackTimerEntry,
};
