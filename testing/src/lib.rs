//! # Passgate Testing
//!
//! Testing utilities and helpers for the Passgate reducer architecture.
//!
//! This crate provides:
//! - Deterministic clocks (`FixedClock`, `MutableClock`)
//! - `ReducerTest`, a Given-When-Then harness for reducers
//! - Effect assertion helpers
//! - Test tracing setup
//!
//! ## Example
//!
//! ```ignore
//! use passgate_testing::{test_clock, ReducerTest};
//!
//! ReducerTest::new(PassReducer::new())
//!     .with_env(test_environment(test_clock()))
//!     .given_state(PassState::loaded(paid_ticket()))
//!     .when_action(PassAction::VerifyPass)
//!     .then_state(|state| assert!(state.verdict().is_some()))
//!     .run();
//! ```

use chrono::{DateTime, Duration, Utc};
use passgate_core::environment::Clock;


/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Duration, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use passgate_testing::mocks::FixedClock;
    /// use passgate_core::environment::Clock;
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

    /// Clock that only moves when a test advances it
    ///
    /// Clones share the same underlying time, so a test can keep one handle
    /// and hand another to the environment under test.
    #[derive(Debug, Clone)]
    pub struct MutableClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl MutableClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward (or backward, for negative durations)
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for MutableClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// The instant every `test_clock` starts at (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(1_735_689_600)
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }
}

/// Install a tracing subscriber that writes through the test harness
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{test_clock, test_epoch, FixedClock, MutableClock};
pub use reducer_test::{assertions, ReducerTest};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn mutable_clock_clones_share_time() {
        let clock = MutableClock::new(test_epoch());
        let handle = clock.clone();

        handle.advance(Duration::days(2));

        assert_eq!(clock.now(), test_epoch() + Duration::days(2));

        clock.set(test_epoch());
        assert_eq!(handle.now(), test_epoch());
    }
}
