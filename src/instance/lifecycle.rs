//! # Execution lifecycle of one application instance.
//!
//! [`Lifecycle`] owns the instance's state — Running, Suspended or
//! Terminated — and is consulted by the scheduling queue, the async bridge
//! and the event adapter before anything script-visible happens.
//!
//! ## Rules
//! - Terminated is absorbing: no transition leaves it.
//! - Suspension is the cancellation mechanism for script-visible delivery;
//!   it does not abort in-flight off-thread work.
//! - Termination cancels the instance's [`CancellationToken`], which stops
//!   the queue's drain worker and any timers parked on the token.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of an application instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Executing normally; script-visible delivery proceeds.
    Running,
    /// Paused; script-visible delivery is withheld, registrations survive.
    Suspended,
    /// Gone; all future scheduling fails fast, registrations are discarded.
    Terminated,
}

/// Shared lifecycle handle for one instance.
///
/// Cheap to share behind an `Arc`; state reads are lock-free on the watch
/// channel and transitions are serialized by it.
pub struct Lifecycle {
    state: watch::Sender<InstanceState>,
    token: CancellationToken,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Creates a lifecycle in the Running state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(InstanceState::Running);
        Self {
            state,
            token: CancellationToken::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> InstanceState {
        *self.state.borrow()
    }

    /// True while the instance is Running.
    pub fn is_running(&self) -> bool {
        self.state() == InstanceState::Running
    }

    /// True once the instance is Terminated.
    pub fn is_terminated(&self) -> bool {
        self.state() == InstanceState::Terminated
    }

    /// Running → Suspended. Returns true if the state changed.
    pub fn suspend(&self) -> bool {
        self.transition(InstanceState::Running, InstanceState::Suspended)
    }

    /// Suspended → Running. Returns true if the state changed.
    pub fn resume(&self) -> bool {
        self.transition(InstanceState::Suspended, InstanceState::Running)
    }

    /// Any state → Terminated; cancels the instance token.
    ///
    /// Returns true if the instance was not already terminated.
    pub fn terminate(&self) -> bool {
        let changed = self.state.send_if_modified(|s| {
            if *s == InstanceState::Terminated {
                false
            } else {
                *s = InstanceState::Terminated;
                true
            }
        });
        if changed {
            self.token.cancel();
        }
        changed
    }

    /// Token cancelled at termination; used by the queue worker and timers.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Receiver observing state transitions (used to wait out a suspension).
    pub fn watch(&self) -> watch::Receiver<InstanceState> {
        self.state.subscribe()
    }

    fn transition(&self, from: InstanceState, to: InstanceState) -> bool {
        self.state.send_if_modified(|s| {
            if *s == from {
                *s = to;
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let lc = Lifecycle::new();
        assert_eq!(lc.state(), InstanceState::Running);

        assert!(lc.suspend());
        assert_eq!(lc.state(), InstanceState::Suspended);
        assert!(!lc.suspend());

        assert!(lc.resume());
        assert!(lc.is_running());
        assert!(!lc.resume());
    }

    #[test]
    fn test_terminated_is_absorbing() {
        let lc = Lifecycle::new();
        assert!(lc.terminate());
        assert!(lc.token().is_cancelled());

        assert!(!lc.terminate());
        assert!(!lc.suspend());
        assert!(!lc.resume());
        assert_eq!(lc.state(), InstanceState::Terminated);
    }
}
