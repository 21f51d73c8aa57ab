//! # SchedulingQueue: the exclusive task funnel of one instance.
//!
//! All script-visible effects of host-side concurrency are expressed as tasks
//! submitted here. One drain worker executes them strictly in arrival order,
//! one at a time — the mutual-exclusion guarantee that lets the instance
//! treat its visible state as single-threaded.
//!
//! ## Architecture
//! ```text
//! Producers (many):                       Drain worker (one):
//!   event adapter ──┐
//!   async bridge  ──┼──► [FIFO channel] ──► dispatch ──► task()
//!   host threads  ──┘                         │
//!                                             └─ lifecycle gate:
//!                                                Terminated → cancel task
//!                                                Suspended  → drop / hold
//!                                                             script tasks
//! ```
//!
//! ## Rules
//! - **FIFO**: a task runs strictly after all earlier tasks of the same
//!   instance and strictly before later ones (arrival sequence numbers).
//! - **Exclusive**: at most one task executes at a time, by construction.
//! - **Gated twice**: lifecycle is checked at enqueue *and* again at drain
//!   time, so a suspension between the two still withholds script delivery.
//! - **Fail fast on termination**: `schedule` against a terminated instance
//!   returns [`ScheduleError::Terminated`] and the task never runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::ScheduleError;
use crate::instance::lifecycle::{InstanceState, Lifecycle};

/// Where a task comes from; decides how suspension treats it.
///
/// Pause means "stop delivering to the script": script-originated tasks are
/// subject to the [`SuspendPolicy`], while internal bookkeeping tasks do not
/// touch script state and run regardless of suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOrigin {
    /// Task delivers something script-visible.
    Script,
    /// Host-side bookkeeping; unaffected by suspension.
    Internal,
}

/// What the queue does with script-originated tasks while suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuspendPolicy {
    /// Reject at enqueue and drop at drain; nothing crosses the pause.
    #[default]
    DropScriptTasks,
    /// Accept and hold; held tasks drain in order once the instance resumes.
    QueueScriptTasks,
}

/// How the drain worker disposes of one task.
pub(crate) enum TaskFate {
    /// Execute the task on the drain worker.
    Run,
    /// Discard it; blocking callers observe the error, script observes nothing.
    Cancel(ScheduleError),
}

struct ScheduledTask {
    seq: u64,
    origin: TaskOrigin,
    run: Box<dyn FnOnce(TaskFate) + Send>,
}

/// Per-instance exclusive scheduling queue.
pub struct SchedulingQueue {
    lifecycle: Arc<Lifecycle>,
    policy: SuspendPolicy,
    tx: mpsc::UnboundedSender<ScheduledTask>,
    seq: AtomicU64,
}

impl SchedulingQueue {
    /// Creates the queue and spawns its drain worker.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(lifecycle: Arc<Lifecycle>, policy: SuspendPolicy) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker_lifecycle = Arc::clone(&lifecycle);
        tokio::spawn(drain_worker(worker_lifecycle, policy, rx));
        Arc::new(Self {
            lifecycle,
            policy,
            tx,
            seq: AtomicU64::new(0),
        })
    }

    /// Enqueues `f` and waits for it to run on the instance thread,
    /// returning its result.
    ///
    /// Fails fast with [`ScheduleError::Terminated`] if the instance is
    /// terminated; resolves [`ScheduleError::Dropped`] if the task is
    /// discarded before running.
    pub async fn schedule<R, F>(&self, origin: TaskOrigin, f: F) -> Result<R, ScheduleError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(
            origin,
            Box::new(move |fate| {
                let _ = match fate {
                    TaskFate::Run => tx.send(Ok(f())),
                    TaskFate::Cancel(e) => tx.send(Err(e)),
                };
            }),
        )?;
        rx.await.unwrap_or(Err(ScheduleError::Terminated))
    }

    /// Fire-and-forget variant: enqueues `f` without waiting for execution.
    ///
    /// The returned error only reports enqueue-time rejection; a task dropped
    /// later at drain time vanishes silently.
    pub fn schedule_no_error<F>(&self, origin: TaskOrigin, f: F) -> Result<(), ScheduleError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(
            origin,
            Box::new(move |fate| {
                if let TaskFate::Run = fate {
                    f();
                }
            }),
        )
        .map(|_seq| ())
    }

    /// Low-level enqueue used by the bridge: the closure observes its fate,
    /// so exactly-once bookkeeping can distinguish Run from Cancel.
    pub(crate) fn submit(
        &self,
        origin: TaskOrigin,
        run: Box<dyn FnOnce(TaskFate) + Send>,
    ) -> Result<u64, ScheduleError> {
        match self.lifecycle.state() {
            InstanceState::Terminated => Err(ScheduleError::Terminated),
            InstanceState::Suspended
                if origin == TaskOrigin::Script && self.policy == SuspendPolicy::DropScriptTasks =>
            {
                Err(ScheduleError::Dropped)
            }
            _ => {
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                match self.tx.send(ScheduledTask { seq, origin, run }) {
                    Ok(()) => Ok(seq),
                    Err(mpsc::error::SendError(task)) => {
                        // Worker already gone: the instance terminated
                        // between the state check and the send.
                        (task.run)(TaskFate::Cancel(ScheduleError::Terminated));
                        Err(ScheduleError::Terminated)
                    }
                }
            }
        }
    }

    /// Number of tasks accepted so far (arrival sequence high-water mark).
    pub fn accepted(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }
}

/// Drains tasks one at a time until the lifecycle token is cancelled; then
/// cancels everything still queued.
async fn drain_worker(
    lifecycle: Arc<Lifecycle>,
    policy: SuspendPolicy,
    mut rx: mpsc::UnboundedReceiver<ScheduledTask>,
) {
    let token = lifecycle.token();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            next = rx.recv() => match next {
                Some(task) => dispatch(&lifecycle, policy, task).await,
                None => break,
            }
        }
    }

    rx.close();
    while let Ok(task) = rx.try_recv() {
        (task.run)(TaskFate::Cancel(ScheduleError::Terminated));
    }
}

/// Applies the drain-time lifecycle gate to one task, then disposes of it.
async fn dispatch(lifecycle: &Lifecycle, policy: SuspendPolicy, task: ScheduledTask) {
    match lifecycle.state() {
        InstanceState::Terminated => (task.run)(TaskFate::Cancel(ScheduleError::Terminated)),
        InstanceState::Suspended if task.origin == TaskOrigin::Script => match policy {
            SuspendPolicy::DropScriptTasks => {
                eprintln!(
                    "[appvisor] dropping script task #{}: instance suspended",
                    task.seq
                );
                (task.run)(TaskFate::Cancel(ScheduleError::Dropped));
            }
            SuspendPolicy::QueueScriptTasks => {
                let mut watch = lifecycle.watch();
                while *watch.borrow() == InstanceState::Suspended {
                    if watch.changed().await.is_err() {
                        break;
                    }
                }
                if lifecycle.is_terminated() {
                    (task.run)(TaskFate::Cancel(ScheduleError::Terminated));
                } else {
                    (task.run)(TaskFate::Run);
                }
            }
        },
        _ => (task.run)(TaskFate::Run),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;

    fn queue(policy: SuspendPolicy) -> (Arc<Lifecycle>, Arc<SchedulingQueue>) {
        let lifecycle = Arc::new(Lifecycle::new());
        let queue = SchedulingQueue::new(Arc::clone(&lifecycle), policy);
        (lifecycle, queue)
    }

    #[tokio::test]
    async fn test_blocking_schedule_returns_value() {
        let (_lc, q) = queue(SuspendPolicy::default());
        let out = q.schedule(TaskOrigin::Script, || 41 + 1).await;
        assert_eq!(out, Ok(42));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (_lc, q) = queue(SuspendPolicy::default());
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..50u32 {
            let order = Arc::clone(&order);
            q.schedule_no_error(TaskOrigin::Script, move || order.lock().push(i))
                .unwrap();
        }
        // Blocking schedule doubles as a barrier: it runs after everything above.
        q.schedule(TaskOrigin::Script, || ()).await.unwrap();

        assert_eq!(*order.lock(), (0..50).collect::<Vec<_>>());
        assert_eq!(q.accepted(), 51);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tasks_never_run_concurrently() {
        let (_lc, q) = queue(SuspendPolicy::default());
        let active = Arc::new(AtomicU64::new(0));
        let peak = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let q = Arc::clone(&q);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                q.schedule(TaskOrigin::Script, move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_micros(200));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminated_fails_fast() {
        let (lc, q) = queue(SuspendPolicy::default());
        lc.terminate();

        let res = q.schedule(TaskOrigin::Script, || ()).await;
        assert_eq!(res, Err(ScheduleError::Terminated));
        assert_eq!(
            q.schedule_no_error(TaskOrigin::Internal, || ()),
            Err(ScheduleError::Terminated)
        );
    }

    #[tokio::test]
    async fn test_suspended_rejects_script_tasks_at_enqueue() {
        let (lc, q) = queue(SuspendPolicy::DropScriptTasks);
        lc.suspend();

        let res = q.schedule(TaskOrigin::Script, || ()).await;
        assert_eq!(res, Err(ScheduleError::Dropped));
    }

    #[tokio::test]
    async fn test_suspension_after_enqueue_drops_script_task_at_drain() {
        let (lc, q) = queue(SuspendPolicy::DropScriptTasks);
        let ran = Arc::new(AtomicBool::new(false));

        // Current-thread runtime: the drain worker has not been polled yet,
        // so the task is still queued when the suspension lands.
        let flag = Arc::clone(&ran);
        q.schedule_no_error(TaskOrigin::Script, move || flag.store(true, Ordering::SeqCst))
            .unwrap();
        lc.suspend();

        // Internal barrier task proves the worker got past the script task.
        q.schedule(TaskOrigin::Internal, || ()).await.unwrap();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_internal_tasks_run_while_suspended() {
        let (lc, q) = queue(SuspendPolicy::DropScriptTasks);
        lc.suspend();

        let out = q.schedule(TaskOrigin::Internal, || "bookkeeping").await;
        assert_eq!(out, Ok("bookkeeping"));
    }

    #[tokio::test]
    async fn test_queue_script_tasks_policy_holds_until_resume() {
        let (lc, q) = queue(SuspendPolicy::QueueScriptTasks);
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        q.schedule_no_error(TaskOrigin::Script, move || flag.store(true, Ordering::SeqCst))
            .unwrap();
        lc.suspend();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!ran.load(Ordering::SeqCst), "task ran while suspended");

        lc.resume();
        q.schedule(TaskOrigin::Internal, || ()).await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_pending_tasks_cancelled_at_termination() {
        let (lc, q) = queue(SuspendPolicy::default());
        let ran = Arc::new(AtomicBool::new(false));

        // Enqueued but not yet drained: the worker has not been polled.
        let flag = Arc::clone(&ran);
        q.schedule_no_error(TaskOrigin::Script, move || flag.store(true, Ordering::SeqCst))
            .unwrap();
        lc.terminate();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!ran.load(Ordering::SeqCst), "cancelled task still ran");
    }
}
