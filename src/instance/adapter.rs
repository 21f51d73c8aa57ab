//! # EventAdapter: domain buses in, script callbacks out.
//!
//! Binds [`EventBus`] subscriptions to one instance's
//! [`SchedulingQueue`](crate::SchedulingQueue). A publishing thread never
//! invokes script-visible code directly: delivery is "schedule a script task
//! that invokes the registered listeners with the serialized payload".
//!
//! ## Pause/resume contract
//! - [`EventAdapter::pause`] detaches every active bus subscription without
//!   discarding the registration records.
//! - [`EventAdapter::start_or_resume`] re-attaches every recorded
//!   registration; an already-attached registration is left alone, so
//!   resuming never duplicates subscriptions.
//! - Nothing published while paused is buffered across the pause boundary;
//!   those events are simply missed (a lifecycle-driven cancellation, not an
//!   error).
//! - The registration set survives any number of pause/resume cycles and is
//!   cleared only at instance termination ([`EventAdapter::clear`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::ModuleError;
use crate::events::{BufferingPolicy, EventBus, SubscriptionHandle};
use crate::instance::queue::{SchedulingQueue, TaskOrigin};

/// Identifies one script listener within its event type.
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&Value) + Send + Sync>;
type ListenerSet = Arc<Mutex<Vec<(ListenerId, Listener)>>>;

/// One adapted domain event: how to (re-)subscribe, and who listens.
struct Registration {
    listeners: ListenerSet,
    attach: Box<dyn Fn() -> SubscriptionHandle + Send + Sync>,
    detach: Box<dyn Fn(&SubscriptionHandle) + Send + Sync>,
    active: Option<SubscriptionHandle>,
}

/// Per-instance adapter between shared event buses and the script.
pub struct EventAdapter {
    queue: Arc<SchedulingQueue>,
    registrations: Mutex<HashMap<String, Registration>>,
    next_listener: AtomicU64,
    started: AtomicBool,
}

impl EventAdapter {
    /// Creates an adapter feeding the given queue. Starts detached; call
    /// [`EventAdapter::start_or_resume`] once the adapted events are set up.
    pub fn new(queue: Arc<SchedulingQueue>) -> Self {
        Self {
            queue,
            registrations: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(0),
            started: AtomicBool::new(false),
        }
    }

    /// Records how `bus` maps to the script event `event_type`.
    ///
    /// `serialize` runs on the bus's delivery worker; the resulting payload
    /// is handed to listeners on the instance thread. If the adapter is
    /// already started, the subscription is attached immediately.
    pub fn adapt_event<T, S>(&self, bus: &EventBus<T>, event_type: impl Into<String>, serialize: S)
    where
        T: Clone + Send + 'static,
        S: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let listeners: ListenerSet = Arc::new(Mutex::new(Vec::new()));
        let serialize = Arc::new(serialize);

        let attach = {
            let bus = bus.clone();
            let queue = Arc::clone(&self.queue);
            let listeners = Arc::clone(&listeners);
            Box::new(move || {
                let serialize = Arc::clone(&serialize);
                let queue = Arc::clone(&queue);
                let listeners = Arc::clone(&listeners);
                bus.subscribe(
                    move |value: T| {
                        let payload = serialize(&value);
                        let listeners = Arc::clone(&listeners);
                        let _ = queue.schedule_no_error(TaskOrigin::Script, move || {
                            // Snapshot so listeners may add/remove during delivery.
                            let current: Vec<Listener> =
                                listeners.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
                            for listener in current {
                                listener(&payload);
                            }
                        });
                    },
                    BufferingPolicy::Unbounded,
                )
            })
        };
        let detach = {
            let bus = bus.clone();
            Box::new(move |handle: &SubscriptionHandle| {
                bus.unsubscribe(handle);
            })
        };

        let active = if self.started.load(Ordering::Acquire) {
            Some(attach())
        } else {
            None
        };

        let mut regs = self.registrations.lock();
        if let Some(old) = regs.insert(
            event_type.into(),
            Registration {
                listeners,
                attach,
                detach,
                active,
            },
        ) {
            if let Some(handle) = old.active {
                (old.detach)(&handle);
            }
        }
    }

    /// Adapts a payload-free event; listeners receive `Value::Null`.
    pub fn adapt_no_arg_event(&self, bus: &EventBus<()>, event_type: impl Into<String>) {
        self.adapt_event(bus, event_type, |_| Value::Null);
    }

    /// Registers a script listener for an adapted event type.
    pub fn add_event_listener<F>(
        &self,
        event_type: &str,
        callback: F,
    ) -> Result<ListenerId, ModuleError>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let regs = self.registrations.lock();
        let reg = regs
            .get(event_type)
            .ok_or_else(|| ModuleError::not_found("event", event_type))?;
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        reg.listeners.lock().push((id, Arc::new(callback)));
        Ok(id)
    }

    /// Removes one script listener. Returns false if it was already gone.
    pub fn remove_event_listener(&self, event_type: &str, id: ListenerId) -> bool {
        let regs = self.registrations.lock();
        let Some(reg) = regs.get(event_type) else {
            return false;
        };
        let mut listeners = reg.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Attaches every recorded registration that is not already attached.
    pub fn start_or_resume(&self) {
        self.started.store(true, Ordering::Release);
        let mut regs = self.registrations.lock();
        for reg in regs.values_mut() {
            if reg.active.is_none() {
                reg.active = Some((reg.attach)());
            }
        }
    }

    /// Detaches every active subscription; registration records survive.
    pub fn pause(&self) {
        self.started.store(false, Ordering::Release);
        let mut regs = self.registrations.lock();
        for reg in regs.values_mut() {
            if let Some(handle) = reg.active.take() {
                (reg.detach)(&handle);
            }
        }
    }

    /// Detaches and discards every registration (instance termination).
    pub fn clear(&self) {
        self.pause();
        self.registrations.lock().clear();
    }

    /// Listener count for one event type (0 if the type is not adapted).
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.registrations
            .lock()
            .get(event_type)
            .map(|r| r.listeners.lock().len())
            .unwrap_or(0)
    }
}
