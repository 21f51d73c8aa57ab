//! # Typed publish/subscribe bus with per-subscription buffering.
//!
//! [`EventBus`] broadcasts immutable typed values to zero or more
//! subscribers. Publish order is the only meaningful order.
//!
//! ## Architecture
//! ```text
//!    notify(value)                 (clone per subscriber)
//!        │
//!        ├──────────► [pipe S1: Unbounded] ─► worker S1 ─► callback(value)
//!        ├──────────► [pipe S2: LatestOnly] ─► worker S2 ─► callback(value)
//!        └──────────► [pipe SN: DropNew]   ─► worker SN ─► callback(value)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `notify()` never waits on subscriber delivery;
//!   it is callable concurrently from any thread, async context or not.
//! - **Per-subscriber serialization**: each subscription is drained by one
//!   dedicated worker, so no two deliveries to the same subscriber overlap.
//!   Different subscribers are serviced concurrently.
//! - **Buffering is per subscription**: each pipe applies the
//!   [`BufferingPolicy`] chosen at registration (see [`crate::BufferingPolicy`]).
//! - **Panic isolation**: a panicking callback is caught and reported; the
//!   worker keeps draining subsequent values.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::events::policy::BufferingPolicy;

/// Handle identifying one subscription on its bus.
///
/// Pass it back to [`EventBus::unsubscribe`] to stop delivery. Dropping the
/// handle does nothing by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
}

/// Coalescing slot backing a `LatestOnly` subscription.
struct LatestSlot<T> {
    value: Mutex<Option<T>>,
    notify: Notify,
    closed: AtomicBool,
}

/// Per-subscription delivery pipe; the variant encodes the buffering policy.
enum Pipe<T> {
    Unbounded(mpsc::UnboundedSender<T>),
    DropNew(mpsc::Sender<T>),
    Latest(Arc<LatestSlot<T>>),
}

impl<T> Pipe<T> {
    /// Hands a published value to the subscription without blocking.
    fn push(&self, value: T) {
        match self {
            Pipe::Unbounded(tx) => {
                let _ = tx.send(value);
            }
            // Full channel means a delivery is already pending: DropNew
            // semantics say this value is ignored for the subscriber.
            Pipe::DropNew(tx) => {
                let _ = tx.try_send(value);
            }
            Pipe::Latest(slot) => {
                *slot.value.lock() = Some(value);
                slot.notify.notify_one();
            }
        }
    }

    /// Signals the worker to stop once drained.
    fn close(&self) {
        if let Pipe::Latest(slot) = self {
            slot.closed.store(true, Ordering::Release);
            slot.notify.notify_one();
        }
        // mpsc pipes close when the sender is dropped with the map entry.
    }
}

struct Inner<T> {
    subs: Mutex<HashMap<u64, Pipe<T>>>,
    next_id: AtomicU64,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        for pipe in self.subs.lock().values() {
            pipe.close();
        }
    }
}

/// Typed broadcast bus.
///
/// Cheap to clone (internally holds an `Arc`); clones publish to and manage
/// the same subscriber set. Dropping the last clone closes all workers.
pub struct EventBus<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for EventBus<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventBus<T>
where
    T: Clone + Send + 'static,
{
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a subscriber and spawns its delivery worker.
    ///
    /// The callback runs on the subscription's own worker task; deliveries to
    /// one subscriber never overlap. The buffering `policy` governs what
    /// happens to values published while a delivery is pending.
    pub fn subscribe<F>(&self, callback: F, policy: BufferingPolicy) -> SubscriptionHandle
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let pipe = match policy {
            BufferingPolicy::Unbounded => {
                let (tx, mut rx) = mpsc::unbounded_channel::<T>();
                tokio::spawn(async move {
                    while let Some(v) = rx.recv().await {
                        deliver(&callback, v).await;
                    }
                });
                Pipe::Unbounded(tx)
            }
            BufferingPolicy::DropNew => {
                let (tx, mut rx) = mpsc::channel::<T>(1);
                tokio::spawn(async move {
                    while let Some(v) = rx.recv().await {
                        deliver(&callback, v).await;
                    }
                });
                Pipe::DropNew(tx)
            }
            BufferingPolicy::LatestOnly => {
                let slot = Arc::new(LatestSlot {
                    value: Mutex::new(None),
                    notify: Notify::new(),
                    closed: AtomicBool::new(false),
                });
                let worker_slot = Arc::clone(&slot);
                tokio::spawn(async move {
                    loop {
                        let next = worker_slot.value.lock().take();
                        match next {
                            Some(v) => deliver(&callback, v).await,
                            None => {
                                if worker_slot.closed.load(Ordering::Acquire) {
                                    break;
                                }
                                // notify_one stores a permit, so a value set
                                // between the take above and this await still
                                // wakes the worker immediately.
                                worker_slot.notify.notified().await;
                            }
                        }
                    }
                });
                Pipe::Latest(slot)
            }
        };

        self.inner.subs.lock().insert(id, pipe);
        SubscriptionHandle { id }
    }

    /// Publishes a value to every subscriber current at call time.
    ///
    /// Never blocks on delivery; each subscriber's pipe applies its own
    /// buffering policy independently.
    pub fn notify(&self, value: T) {
        let subs = self.inner.subs.lock();
        for pipe in subs.values() {
            pipe.push(value.clone());
        }
    }

    /// Removes a subscription; its worker stops after draining what it holds.
    ///
    /// Returns false if the handle was already unsubscribed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        match self.inner.subs.lock().remove(&handle.id) {
            Some(pipe) => {
                pipe.close();
                true
            }
            None => false,
        }
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.lock().len()
    }
}

/// Runs one callback invocation, isolating panics the way subscriber workers
/// must: report and keep going.
async fn deliver<T, F>(callback: &F, value: T)
where
    F: Fn(T) + Send,
{
    let fut = async { callback(value) };
    if let Err(panic_err) = AssertUnwindSafe(fut).catch_unwind().await {
        eprintln!("[appvisor] subscriber callback panicked: {panic_err:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;
    use tokio::time::timeout;

    async fn recv_one<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_unbounded_delivers_all_in_publish_order() {
        let bus = EventBus::<u32>::new();
        let (tx, mut rx) = unbounded_channel();
        let _h = bus.subscribe(move |v| tx.send(v).unwrap(), BufferingPolicy::Unbounded);

        for i in 0..100 {
            bus.notify(i);
        }
        for i in 0..100 {
            assert_eq!(recv_one(&mut rx).await, i);
        }
    }

    #[tokio::test]
    async fn test_latest_only_coalesces_to_most_recent() {
        let bus = EventBus::<u32>::new();
        let (tx, mut rx) = unbounded_channel();
        let _h = bus.subscribe(move |v| tx.send(v).unwrap(), BufferingPolicy::LatestOnly);

        // Current-thread runtime: the worker has not been polled yet, so all
        // three publishes land while the first delivery is still pending.
        bus.notify(1);
        bus.notify(2);
        bus.notify(3);

        assert_eq!(recv_one(&mut rx).await, 3);
        bus.notify(4);
        assert_eq!(recv_one(&mut rx).await, 4);
    }

    #[tokio::test]
    async fn test_drop_new_ignores_while_pending() {
        let bus = EventBus::<u32>::new();
        let (tx, mut rx) = unbounded_channel();
        let _h = bus.subscribe(move |v| tx.send(v).unwrap(), BufferingPolicy::DropNew);

        bus.notify(1);
        bus.notify(2);
        bus.notify(3);

        assert_eq!(recv_one(&mut rx).await, 1);
        bus.notify(4);
        assert_eq!(recv_one(&mut rx).await, 4);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::<u32>::new();
        let (tx, mut rx) = unbounded_channel();
        let h = bus.subscribe(move |v| tx.send(v).unwrap(), BufferingPolicy::Unbounded);

        bus.notify(1);
        assert_eq!(recv_one(&mut rx).await, 1);

        assert!(bus.unsubscribe(&h));
        assert!(!bus.unsubscribe(&h));
        assert_eq!(bus.subscriber_count(), 0);

        bus.notify(2);
        // The pipe is gone; the worker's channel closes and the test channel
        // yields None rather than a value.
        let next = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(matches!(next, Ok(None) | Err(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_notify_from_many_threads() {
        let bus = EventBus::<u32>::new();
        let (tx, mut rx) = unbounded_channel();
        let _h = bus.subscribe(move |v| tx.send(v).unwrap(), BufferingPolicy::Unbounded);

        let mut publishers = Vec::new();
        for p in 0..4u32 {
            let bus = bus.clone();
            publishers.push(tokio::spawn(async move {
                for i in 0..25u32 {
                    bus.notify(p * 100 + i);
                }
            }));
        }
        for p in publishers {
            p.await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..100 {
            seen.push(recv_one(&mut rx).await);
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 100);
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_kill_worker() {
        let bus = EventBus::<u32>::new();
        let (tx, mut rx) = unbounded_channel();
        let _h = bus.subscribe(
            move |v| {
                if v == 1 {
                    panic!("boom");
                }
                tx.send(v).unwrap();
            },
            BufferingPolicy::Unbounded,
        );

        bus.notify(1);
        bus.notify(2);
        assert_eq!(recv_one(&mut rx).await, 2);
    }

    #[tokio::test]
    async fn test_each_subscriber_has_independent_policy() {
        let bus = EventBus::<u32>::new();
        let (tx_all, mut rx_all) = unbounded_channel();
        let (tx_latest, mut rx_latest) = unbounded_channel();
        let _a = bus.subscribe(move |v| tx_all.send(v).unwrap(), BufferingPolicy::Unbounded);
        let _b = bus.subscribe(
            move |v| tx_latest.send(v).unwrap(),
            BufferingPolicy::LatestOnly,
        );

        bus.notify(1);
        bus.notify(2);

        assert_eq!(recv_one(&mut rx_all).await, 1);
        assert_eq!(recv_one(&mut rx_all).await, 2);
        assert_eq!(recv_one(&mut rx_latest).await, 2);
    }
}
