//! # Per-instance runtime configuration.
//!
//! [`Config`] defines how an [`ApplicationInstance`](crate::ApplicationInstance)
//! behaves at the seams where policy is genuinely a choice: what happens to
//! script-originated tasks while the instance is suspended.
//!
//! # Example
//! ```
//! use appvisor::{Config, SuspendPolicy};
//!
//! let mut cfg = Config::default();
//! cfg.suspend = SuspendPolicy::DropScriptTasks;
//!
//! assert_eq!(cfg.suspend, SuspendPolicy::DropScriptTasks);
//! ```

use crate::instance::SuspendPolicy;

/// Configuration for one application instance.
#[derive(Clone, Copy, Debug, Default)]
pub struct Config {
    /// What the scheduling queue does with script-originated tasks while the
    /// instance is suspended. Internal bookkeeping tasks are never affected.
    pub suspend: SuspendPolicy,
}
