//! One hosted application instance and its execution machinery.
//!
//! ## Contents
//! - [`Lifecycle`] Running / Suspended / Terminated state machine
//! - [`SchedulingQueue`] exclusive FIFO task funnel (the "instance thread")
//! - [`AsyncBridge`] off-thread work with on-thread exactly-once settlement
//! - [`EventAdapter`] bus subscriptions bound to the queue, pause/resume aware
//! - [`ApplicationInstance`] the facade tying the four together
//!
//! Everything in here is per-instance. Cross-instance infrastructure (buses,
//! the configuration propagator) lives outside and is merely subscribed to.

pub mod adapter;
pub mod bridge;
pub mod lifecycle;
pub mod queue;

pub use adapter::{EventAdapter, ListenerId};
pub use bridge::{AsyncBridge, OperationHandle, OperationState};
pub use lifecycle::{InstanceState, Lifecycle};
pub use queue::{SchedulingQueue, SuspendPolicy, TaskOrigin};

use std::sync::Arc;

use crate::config::Config;
use crate::error::ScheduleError;

/// A sandboxed, logically single-threaded application instance.
///
/// The instance's visible state is only ever touched from its scheduling
/// queue's drain worker; host threads interact through [`schedule`],
/// [`bridge`] and [`adapter`].
///
/// [`schedule`]: ApplicationInstance::schedule
/// [`bridge`]: ApplicationInstance::bridge
/// [`adapter`]: ApplicationInstance::adapter
pub struct ApplicationInstance {
    id: Arc<str>,
    lifecycle: Arc<Lifecycle>,
    queue: Arc<SchedulingQueue>,
    adapter: Arc<EventAdapter>,
    bridge: AsyncBridge,
}

impl ApplicationInstance {
    /// Creates an instance in the Running state and spawns its drain worker.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(id: impl Into<Arc<str>>, config: Config) -> Self {
        let lifecycle = Arc::new(Lifecycle::new());
        let queue = SchedulingQueue::new(Arc::clone(&lifecycle), config.suspend);
        let adapter = Arc::new(EventAdapter::new(Arc::clone(&queue)));
        let bridge = AsyncBridge::new(Arc::clone(&queue), Arc::clone(&lifecycle));
        Self {
            id: id.into(),
            lifecycle,
            queue,
            adapter,
            bridge,
        }
    }

    /// Instance identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InstanceState {
        self.lifecycle.state()
    }

    /// Lifecycle handle shared with modules built on this instance.
    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// The instance's exclusive scheduling queue.
    pub fn queue(&self) -> &Arc<SchedulingQueue> {
        &self.queue
    }

    /// The instance's event adapter.
    pub fn adapter(&self) -> &Arc<EventAdapter> {
        &self.adapter
    }

    /// The instance's async bridge.
    pub fn bridge(&self) -> &AsyncBridge {
        &self.bridge
    }

    /// Runs `f` on the instance thread and returns its result.
    pub async fn schedule<R, F>(&self, origin: TaskOrigin, f: F) -> Result<R, ScheduleError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        self.queue.schedule(origin, f).await
    }

    /// Suspends the instance: the lifecycle flips first so tasks already
    /// queued are gated, then the adapter detaches its subscriptions.
    ///
    /// Returns false if the instance was not Running.
    pub fn suspend(&self) -> bool {
        let changed = self.lifecycle.suspend();
        if changed {
            self.adapter.pause();
        }
        changed
    }

    /// Resumes a suspended instance and re-attaches adapted events.
    ///
    /// Returns false if the instance was not Suspended.
    pub fn resume(&self) -> bool {
        let changed = self.lifecycle.resume();
        if changed {
            self.adapter.start_or_resume();
        }
        changed
    }

    /// Terminates the instance: fails future scheduling fast, cancels queued
    /// tasks and pending bridge operations, discards adapter registrations.
    ///
    /// Returns false if the instance was already terminated.
    pub fn terminate(&self) -> bool {
        let changed = self.lifecycle.terminate();
        if changed {
            self.adapter.clear();
        }
        changed
    }
}
