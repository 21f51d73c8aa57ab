//! Error types used by the instance runtime and the consumer modules.
//!
//! This module defines two main error enums:
//!
//! - [`ScheduleError`] — lifecycle-driven outcomes of the scheduling queue and
//!   the async bridge (fail-fast on termination, silent drops on suspension).
//! - [`ModuleError`] — failures surfaced by consumer modules to script-visible
//!   callers: validation, lookup, lifecycle-state and propagated collaborator
//!   errors.
//!
//! Both types provide an `as_label` helper returning a short stable string for
//! logs/metrics.
//!
//! A `Dropped` outcome is not a script-visible error: it is the sanctioned
//! silent path for work whose instance was suspended or terminated before the
//! result could be delivered. Only host-side callers ever observe it.

use thiserror::Error;

/// # Errors produced by the scheduling queue and the async bridge.
///
/// These represent lifecycle-driven refusals, not faults in the scheduled
/// work itself.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The instance is terminated; the task was never accepted and will never run.
    #[error("instance terminated; task not scheduled")]
    Terminated,

    /// The task was discarded before running because the instance was
    /// suspended (or terminated after enqueue). Nothing is raised to script.
    #[error("task dropped before execution")]
    Dropped,
}

impl ScheduleError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ScheduleError::Terminated => "schedule_terminated",
            ScheduleError::Dropped => "schedule_dropped",
        }
    }
}

/// # Errors surfaced by consumer modules.
///
/// The taxonomy is fixed: validation errors are surfaced synchronously and
/// never retried; not-found errors cover unknown identifiers; state errors
/// cover operations invalid for the current lifecycle or entity state;
/// propagated errors wrap collaborator failures with added context and are
/// delivered as rejections of the pending operation.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// Malformed or out-of-range input from the script environment.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// An identifier did not resolve to anything.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity looked up (e.g. "message", "page", "configurable").
        entity: &'static str,
        /// The identifier that failed to resolve.
        id: String,
    },

    /// Operation invalid for the current state of the target.
    #[error("invalid state: {message}")]
    State {
        /// Why the operation is invalid right now.
        message: String,
    },

    /// A collaborator failed; the failure is wrapped with context and
    /// surfaced exactly once as a rejection.
    #[error("{context}: {source_message}")]
    Propagated {
        /// What this core was doing when the collaborator failed.
        context: String,
        /// The collaborator's error, flattened to a message.
        source_message: String,
    },
}

impl ModuleError {
    /// Creates a [`ModuleError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        ModuleError::Validation {
            message: message.into(),
        }
    }

    /// Creates a [`ModuleError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ModuleError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates a [`ModuleError::State`].
    pub fn state(message: impl Into<String>) -> Self {
        ModuleError::State {
            message: message.into(),
        }
    }

    /// Wraps a collaborator failure with context.
    pub fn propagated(context: impl Into<String>, source: impl std::fmt::Display) -> Self {
        ModuleError::Propagated {
            context: context.into(),
            source_message: source.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ModuleError::Validation { .. } => "module_validation",
            ModuleError::NotFound { .. } => "module_not_found",
            ModuleError::State { .. } => "module_state",
            ModuleError::Propagated { .. } => "module_propagated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        assert_eq!(ScheduleError::Terminated.as_label(), "schedule_terminated");
        assert_eq!(ScheduleError::Dropped.as_label(), "schedule_dropped");
        assert_eq!(ModuleError::validation("x").as_label(), "module_validation");
        assert_eq!(
            ModuleError::not_found("page", "p1").as_label(),
            "module_not_found"
        );
    }

    #[test]
    fn test_display_carries_context() {
        let err = ModuleError::propagated("loading messages", "connection reset");
        assert_eq!(err.to_string(), "loading messages: connection reset");

        let err = ModuleError::not_found("message", "1234");
        assert_eq!(err.to_string(), "message not found: 1234");
    }
}
