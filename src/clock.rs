//! Monotonic "now" and timer primitives, injectable so components never
//! call `Utc::now()` directly and tests can drive time explicitly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
///
/// Every clock read in the queue, scheduler, and persistence layers goes
/// through this trait instead of `Utc::now()` so tests can substitute a
/// [`TestClock`] and assert on deterministic timelines.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A shared, thread-safe clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Returns a [`SharedClock`] backed by [`SystemClock`].
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Test clock whose value is advanced explicitly by the caller.
///
/// Useful for asserting on backoff delays and stall timeouts without
/// sleeping in tests.
pub struct TestClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl TestClock {
    /// Create a test clock starting at the given time.
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: std::sync::Mutex::new(start),
        })
    }

    /// Advance the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += chrono::Duration::from_std(duration).unwrap_or_default();
    }

    /// Set the clock to an explicit time.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances_with_wall_time() {
        let clock = SystemClock;
        let first = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now() >= first);
    }

    #[test]
    fn test_clock_only_advances_when_told() {
        let start = Utc::now();
        let clock = TestClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));
    }

    #[test]
    fn test_clock_set_is_absolute() {
        let clock = TestClock::new(Utc::now());
        let target = Utc::now() + chrono::Duration::days(1);
        clock.set(target);
        assert_eq!(clock.now(), target);
    }
}
