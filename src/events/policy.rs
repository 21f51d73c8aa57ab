//! # Buffering policy for event subscriptions.
//!
//! [`BufferingPolicy`] is the closed set of behaviors a subscription may pick
//! for values published while a previous value is still being delivered to it.
//! Exactly one policy is chosen at registration time and never changes.
//!
//! The behavior of each policy is specified here, once, and tested against
//! the bus independently:
//! - [`BufferingPolicy::Unbounded`] — every published value is queued and
//!   eventually delivered, in publish order.
//! - [`BufferingPolicy::LatestOnly`] — a pending, not-yet-delivered value is
//!   replaced by a newer one; the subscriber observes the most recent value,
//!   never a backlog.
//! - [`BufferingPolicy::DropNew`] — while one value is pending, newly
//!   published values are ignored for this subscriber.

/// Per-subscription buffering behavior, chosen at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferingPolicy {
    /// Queue every pending delivery; deliver all values in publish order.
    #[default]
    Unbounded,
    /// Coalesce pending deliveries into the most recent value.
    LatestOnly,
    /// Ignore new values while one delivery is pending.
    DropNew,
}

impl BufferingPolicy {
    /// True if this policy may discard published values for the subscriber.
    pub fn is_lossy(&self) -> bool {
        !matches!(self, BufferingPolicy::Unbounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lossiness() {
        assert!(!BufferingPolicy::Unbounded.is_lossy());
        assert!(BufferingPolicy::LatestOnly.is_lossy());
        assert!(BufferingPolicy::DropNew.is_lossy());
    }
}
