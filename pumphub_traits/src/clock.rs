use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Wall-clock abstraction for control and timing across the stack.
///
/// - now(): returns the current UTC time
/// - sleep(): sleeps for the provided duration (implementations may simulate)
///
/// Remote therapy targets carry ISO-8601 creation times, so the whole
/// coordinator runs on wall-clock UTC rather than a monotonic instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, d: Duration);
}

/// Default, real-time clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

pub mod test_clock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Deterministic test clock whose time can be advanced manually.
    ///
    /// now() = origin + offset
    /// sleep(d) advances internal time by d without actually sleeping.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        origin: DateTime<Utc>,
        offset: Arc<Mutex<Duration>>,
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestClock {
        pub fn new() -> Self {
            Self::at(Utc::now())
        }

        /// Build a clock anchored at a fixed origin (useful for tests).
        pub fn at(origin: DateTime<Utc>) -> Self {
            Self {
                origin,
                offset: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        /// Advance the clock by the given duration.
        pub fn advance(&self, d: Duration) {
            if let Ok(mut off) = self.offset.lock() {
                *off = off.saturating_add(d);
            }
        }

        /// Set the absolute offset relative to origin.
        pub fn set_offset(&self, d: Duration) {
            if let Ok(mut off) = self.offset.lock() {
                *off = d;
            }
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            let off = self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO);
            self.origin
                + chrono::Duration::from_std(off).unwrap_or_else(|_| chrono::Duration::zero())
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }
}
