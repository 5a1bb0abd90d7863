//! Runtime configuration.
//!
//! Values come from code (builder methods) or from the environment:
//!
//! | Variable | Default |
//! |---|---|
//! | `CASEWORK_ENGINE_VERSION` | crate version |
//! | `CASEWORK_IDLE_TIMEOUT_SECS` | 600 |
//! | `CASEWORK_MAILBOX_CAPACITY` | 256 |
//! | `CASEWORK_SNAPSHOT_INTERVAL` | 0 (off) |
//! | `CASEWORK_DEBUG` | false |
//! | `CASEWORK_ASK_TIMEOUT_SECS` | 30 |

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Configuration shared by every entity host of a system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Engine version stamped into entity histories.
    pub engine_version: String,
    /// How long an entity actor waits for a message before stopping.
    pub idle_timeout: Duration,
    /// Bounded mailbox size per entity.
    pub mailbox_capacity: usize,
    /// Save a snapshot every `n` events; 0 disables snapshots.
    pub snapshot_interval: u64,
    /// Persist debug trace events.
    pub debug: bool,
    /// How long an entity waits for the answer to a command it sent another entity.
    pub ask_timeout: Duration,
}

impl RuntimeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            engine_version: env::var("CASEWORK_ENGINE_VERSION").unwrap_or(defaults.engine_version),
            idle_timeout: env::var("CASEWORK_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.idle_timeout, Duration::from_secs),
            mailbox_capacity: env::var("CASEWORK_MAILBOX_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.mailbox_capacity),
            snapshot_interval: env::var("CASEWORK_SNAPSHOT_INTERVAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.snapshot_interval),
            debug: env::var("CASEWORK_DEBUG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.debug),
            ask_timeout: env::var("CASEWORK_ASK_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.ask_timeout, Duration::from_secs),
        }
    }

    /// Set the engine version.
    #[must_use]
    pub fn with_engine_version(mut self, version: impl Into<String>) -> Self {
        self.engine_version = version.into();
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the mailbox capacity.
    #[must_use]
    pub const fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Set the snapshot interval.
    #[must_use]
    pub const fn with_snapshot_interval(mut self, interval: u64) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Enable or disable debug events.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the ask timeout.
    #[must_use]
    pub const fn with_ask_timeout(mut self, timeout: Duration) -> Self {
        self.ask_timeout = timeout;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            idle_timeout: Duration::from_secs(600),
            mailbox_capacity: 256,
            snapshot_interval: 0,
            debug: false,
            ask_timeout: Duration::from_secs(30),
        }
    }
}
