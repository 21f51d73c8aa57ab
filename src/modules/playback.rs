//! # Playback timer entry.
//!
//! A queue entry that plays for a declared media length and announces
//! completion on an [`EventBus`]. Completion has two racing sources — the
//! armed timer expiring and an explicit [`PlaybackTimerEntry::stop`] — and
//! must fire exactly once. The `played` flag, checked and set under one
//! mutex, is the single arbiter.
//!
//! ## Rules
//! - `playing()` ⇔ playback started and `played` is still false.
//! - `played_for()` is non-decreasing while playing and frozen after
//!   completion.
//! - `stop()` is idempotent; stopping an entry that never played is a no-op.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::events::EventBus;

#[derive(Default)]
struct TimerState {
    started: Option<Instant>,
    stopped: Option<Instant>,
    played: bool,
}

struct Shared {
    state: Mutex<TimerState>,
    done: EventBus<()>,
}

impl Shared {
    /// Claims completion. Returns true for the one caller that wins.
    fn complete(&self) -> bool {
        let mut st = self.state.lock();
        if st.started.is_none() || st.played {
            return false;
        }
        st.played = true;
        if st.stopped.is_none() {
            st.stopped = Some(Instant::now());
        }
        true
    }
}

/// A media queue entry driven by a one-shot playback timer.
pub struct PlaybackTimerEntry {
    queue_id: Arc<str>,
    media_length: Duration,
    requested_by: Option<String>,
    requested_at: Option<DateTime<Utc>>,
    unskippable: bool,
    concealed: bool,
    timer: CancellationToken,
    shared: Arc<Shared>,
}

impl PlaybackTimerEntry {
    /// Creates an entry that will play for `media_length` once started.
    pub fn new(queue_id: impl Into<Arc<str>>, media_length: Duration) -> Self {
        Self {
            queue_id: queue_id.into(),
            media_length,
            requested_by: None,
            requested_at: None,
            unskippable: false,
            concealed: false,
            timer: CancellationToken::new(),
            shared: Arc::new(Shared {
                state: Mutex::new(TimerState::default()),
                done: EventBus::new(),
            }),
        }
    }

    /// Stamps the request bookkeeping: who asked for the entry, and when
    /// (now). `None` marks an entry enqueued by the system itself.
    pub fn fill_request_fields(&mut self, requested_by: Option<String>) {
        self.requested_by = requested_by;
        self.requested_at = Some(Utc::now());
    }

    pub fn queue_id(&self) -> &str {
        &self.queue_id
    }

    pub fn media_length(&self) -> Duration {
        self.media_length
    }

    pub fn requested_by(&self) -> Option<&str> {
        self.requested_by.as_deref()
    }

    pub fn requested_at(&self) -> Option<DateTime<Utc>> {
        self.requested_at
    }

    pub fn unskippable(&self) -> bool {
        self.unskippable
    }

    pub fn set_unskippable(&mut self, unskippable: bool) {
        self.unskippable = unskippable;
    }

    pub fn concealed(&self) -> bool {
        self.concealed
    }

    pub fn set_concealed(&mut self, concealed: bool) {
        self.concealed = concealed;
    }

    /// Bus firing `()` exactly once when playback completes.
    pub fn done_playing(&self) -> &EventBus<()> {
        &self.shared.done
    }

    /// True while playback has started and not yet completed.
    pub fn playing(&self) -> bool {
        let st = self.shared.state.lock();
        st.started.is_some() && !st.played
    }

    /// True once playback completed (by timer or by [`Self::stop`]).
    pub fn played(&self) -> bool {
        self.shared.state.lock().played
    }

    /// How long the entry has been playing; frozen once completed, zero if
    /// playback never started.
    pub fn played_for(&self) -> Duration {
        let st = self.shared.state.lock();
        match (st.started, st.stopped) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            (None, _) => Duration::ZERO,
        }
    }

    /// Starts playback and arms the one-shot timer. A second call while
    /// playing (or after completion) is a no-op.
    ///
    /// Must be called within a tokio runtime.
    pub fn play(&self) {
        {
            let mut st = self.shared.state.lock();
            if st.started.is_some() {
                return;
            }
            st.started = Some(Instant::now());
        }

        let shared = Arc::clone(&self.shared);
        let token = self.timer.clone();
        let length = self.media_length;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(length) => {
                    if shared.complete() {
                        shared.done.notify(());
                    }
                }
            }
        });
    }

    /// Stops playback early. Fires the completion event if this call won the
    /// race against the timer; otherwise does nothing.
    pub fn stop(&self) {
        if self.shared.complete() {
            self.timer.cancel();
            self.shared.done.notify(());
        }
    }
}
