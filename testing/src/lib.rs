//! # Casework Testing
//!
//! Testing utilities for casework entities.
//!
//! This crate provides:
//! - [`FixedClock`]: deterministic time
//! - [`InMemoryEventStore`]: an event store with failure injection and raw writes
//! - [`EntityTest`]: a synchronous harness driving an entity through the real
//!   command pipeline, with captured asks and timers
//!
//! ## Example
//!
//! ```ignore
//! use casework_testing::{EntityTest, InMemoryEventStore};
//!
//! #[test]
//! fn counting() {
//!     let mut test = EntityTest::<Counter>::new("counter-1")
//!         .given(CounterCommand::Create { start: 0 });
//!
//!     test.execute(CounterCommand::Add { amount: 2 }).expect_success();
//!     assert_eq!(test.entity().value, 2);
//! }
//! ```

use chrono::{DateTime, Utc};
use casework_core::environment::Clock;

mod store;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use casework_testing::mocks::FixedClock;
    /// use casework_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a test-friendly tracing subscriber.
///
/// Honours `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub use entity_test::{EntityTest, SentAsk, Step};
pub use mocks::{FixedClock, test_clock};
pub use store::InMemoryEventStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }
}
