//! # AsyncBridge: off-thread work, on-thread settlement.
//!
//! Blocking or long-running work (store access, network calls, timer waits)
//! must never run as a queued task itself. The bridge runs it on an arbitrary
//! tokio worker, concurrently with other instance activity, and only the
//! *result delivery* — the transform — goes through the instance's
//! [`SchedulingQueue`](crate::SchedulingQueue).
//!
//! ## Settlement contract
//! - Settlement is a Script-origin queued task, so it is ordered relative to
//!   other scheduled tasks and never reordered ahead of them.
//! - An operation reaches exactly one of Settled or Dropped, exactly once,
//!   even when completion paths race; an atomic claim is the single arbiter.
//! - If the instance suspends or terminates before settlement runs, the
//!   operation is Dropped: no callback, no value, no error to the instance.
//! - A failed work result travels the identical path and is delivered as a
//!   rejection (the transform receives `Err`).

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::ModuleError;
use crate::instance::lifecycle::Lifecycle;
use crate::instance::queue::{SchedulingQueue, TaskFate, TaskOrigin};

const PENDING: u8 = 0;
const SETTLED: u8 = 1;
const DROPPED: u8 = 2;

/// Terminal-state machine of one bridged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Work or settlement still outstanding.
    Pending,
    /// Transform ran on the instance thread (with a value or a rejection).
    Settled,
    /// Lifecycle cancelled delivery; the transform never ran.
    Dropped,
}

/// Host-side view of a bridged operation.
///
/// The script side only ever observes the transform running; this handle is
/// for host code (supervisors, tests) that needs the outcome.
#[derive(Clone)]
pub struct OperationHandle {
    state: Arc<AtomicU8>,
}

impl OperationHandle {
    /// Current operation state.
    pub fn state(&self) -> OperationState {
        match self.state.load(Ordering::Acquire) {
            SETTLED => OperationState::Settled,
            DROPPED => OperationState::Dropped,
            _ => OperationState::Pending,
        }
    }

    /// True once the operation reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state() != OperationState::Pending
    }
}

/// Runs work off the instance thread and settles results on it.
#[derive(Clone)]
pub struct AsyncBridge {
    queue: Arc<SchedulingQueue>,
    lifecycle: Arc<Lifecycle>,
}

impl AsyncBridge {
    /// Creates a bridge bound to one instance's queue and lifecycle.
    pub fn new(queue: Arc<SchedulingQueue>, lifecycle: Arc<Lifecycle>) -> Self {
        Self { queue, lifecycle }
    }

    /// Runs `work` on a tokio worker; on completion schedules
    /// `transform(result)` on the instance thread.
    pub fn do_async<T, F, Tr>(&self, work: F, transform: Tr) -> OperationHandle
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ModuleError>> + Send + 'static,
        Tr: FnOnce(Result<T, ModuleError>) + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(PENDING));
        let handle = OperationHandle {
            state: Arc::clone(&state),
        };

        let queue = Arc::clone(&self.queue);
        let token = self.lifecycle.token();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => {
                    claim(&state, DROPPED);
                    return;
                }
                r = work => r,
            };
            settle(&queue, &state, result, transform);
        });

        handle
    }

    /// Like [`AsyncBridge::do_async`], with a deadline racing the work.
    ///
    /// Whichever completion path reaches the queue first wins the claim; the
    /// loser observes a non-Pending operation and is a no-op. A hit deadline
    /// settles the operation with a rejection — it is not a Dropped outcome.
    pub fn do_async_with_timeout<T, F, Tr>(
        &self,
        work: F,
        deadline: Duration,
        transform: Tr,
    ) -> OperationHandle
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ModuleError>> + Send + 'static,
        Tr: FnOnce(Result<T, ModuleError>) + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(PENDING));
        let handle = OperationHandle {
            state: Arc::clone(&state),
        };
        let transform = Arc::new(Mutex::new(Some(transform)));
        let settled_early = CancellationToken::new();

        // Work path.
        {
            let queue = Arc::clone(&self.queue);
            let token = self.lifecycle.token();
            let state = Arc::clone(&state);
            let transform = Arc::clone(&transform);
            let settled_early = settled_early.clone();
            tokio::spawn(async move {
                let result = tokio::select! {
                    _ = token.cancelled() => {
                        claim(&state, DROPPED);
                        return;
                    }
                    r = work => r,
                };
                settle_shared(&queue, &state, result, &transform);
                settled_early.cancel();
            });
        }

        // Deadline path.
        {
            let queue = Arc::clone(&self.queue);
            let token = self.lifecycle.token();
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                tokio::select! {
                    _ = settled_early.cancelled() => {}
                    _ = token.cancelled() => {
                        claim(&state, DROPPED);
                    }
                    _ = tokio::time::sleep(deadline) => {
                        let timed_out: Result<T, ModuleError> = Err(ModuleError::propagated(
                            "async operation",
                            format!("timed out after {deadline:?}"),
                        ));
                        settle_shared(&queue, &state, timed_out, &transform);
                    }
                }
            });
        }

        handle
    }
}

/// Claims the Pending → `to` transition; returns true for the winner.
fn claim(state: &AtomicU8, to: u8) -> bool {
    state
        .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

/// Schedules one settlement attempt; falls back to Dropped if the queue
/// refuses the task.
fn settle<T, Tr>(
    queue: &SchedulingQueue,
    state: &Arc<AtomicU8>,
    result: Result<T, ModuleError>,
    transform: Tr,
) where
    T: Send + 'static,
    Tr: FnOnce(Result<T, ModuleError>) + Send + 'static,
{
    let st = Arc::clone(state);
    let outcome = queue.submit(
        TaskOrigin::Script,
        Box::new(move |fate| match fate {
            TaskFate::Run => {
                if claim(&st, SETTLED) {
                    transform(result);
                }
            }
            TaskFate::Cancel(_) => {
                claim(&st, DROPPED);
            }
        }),
    );
    if outcome.is_err() {
        claim(state, DROPPED);
    }
}

/// Settlement attempt for racing paths sharing one transform.
fn settle_shared<T, Tr>(
    queue: &SchedulingQueue,
    state: &Arc<AtomicU8>,
    result: Result<T, ModuleError>,
    transform: &Arc<Mutex<Option<Tr>>>,
) where
    T: Send + 'static,
    Tr: FnOnce(Result<T, ModuleError>) + Send + 'static,
{
    let st = Arc::clone(state);
    let transform = Arc::clone(transform);
    let outcome = queue.submit(
        TaskOrigin::Script,
        Box::new(move |fate| match fate {
            TaskFate::Run => {
                if claim(&st, SETTLED) {
                    if let Some(t) = transform.lock().take() {
                        t(result);
                    }
                }
            }
            TaskFate::Cancel(_) => {
                claim(&st, DROPPED);
            }
        }),
    );
    if outcome.is_err() {
        claim(state, DROPPED);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::queue::SuspendPolicy;
    use std::sync::atomic::AtomicU32;
    use tokio::time::timeout;

    fn bridge() -> (Arc<Lifecycle>, AsyncBridge) {
        let lifecycle = Arc::new(Lifecycle::new());
        let queue = SchedulingQueue::new(Arc::clone(&lifecycle), SuspendPolicy::default());
        let bridge = AsyncBridge::new(queue, Arc::clone(&lifecycle));
        (lifecycle, bridge)
    }

    async fn wait_terminal(handle: &OperationHandle) -> OperationState {
        timeout(Duration::from_secs(5), async {
            while !handle.is_terminal() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("operation never reached a terminal state");
        handle.state()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_settles_exactly_once() {
        let (_lc, bridge) = bridge();
        let settles = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&settles);
        let handle = bridge.do_async(async { Ok(7u32) }, move |res| {
            assert_eq!(res, Ok(7));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(wait_terminal(&handle).await, OperationState::Settled);
        assert_eq!(settles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_delivered_as_rejection() {
        let (_lc, bridge) = bridge();
        let settles = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&settles);
        let handle = bridge.do_async(
            async { Err::<u32, _>(ModuleError::propagated("store", "boom")) },
            move |res| {
                assert!(matches!(res, Err(ModuleError::Propagated { .. })));
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert_eq!(wait_terminal(&handle).await, OperationState::Settled);
        assert_eq!(settles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_termination_mid_flight_drops_without_callback() {
        let (lc, bridge) = bridge();
        let settles = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&settles);
        let handle = bridge.do_async(
            async {
                std::future::pending::<()>().await;
                Ok(0u32)
            },
            move |_res| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        lc.terminate();
        assert_eq!(wait_terminal(&handle).await, OperationState::Dropped);
        assert_eq!(settles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspension_before_settlement_drops() {
        let (lc, bridge) = bridge();
        let settles = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&settles);
        // Suspend before the spawned work is ever polled: settlement then
        // arrives at a suspended queue and is refused.
        let handle = bridge.do_async(async { Ok(1u32) }, move |_res| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        lc.suspend();

        assert_eq!(wait_terminal(&handle).await, OperationState::Dropped);
        assert_eq!(settles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_beats_slow_work() {
        let (_lc, bridge) = bridge();
        let settles = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&settles);
        let handle = bridge.do_async_with_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(1u32)
            },
            Duration::from_millis(50),
            move |res| {
                assert!(res.is_err(), "expected the deadline rejection");
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert_eq!(wait_terminal(&handle).await, OperationState::Settled);
        assert_eq!(settles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_work_beats_deadline() {
        let (_lc, bridge) = bridge();
        let settles = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&settles);
        let handle = bridge.do_async_with_timeout(
            async { Ok(9u32) },
            Duration::from_secs(60),
            move |res| {
                assert_eq!(res, Ok(9));
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert_eq!(wait_terminal(&handle).await, OperationState::Settled);
        assert_eq!(settles.load(Ordering::SeqCst), 1);
    }
}
