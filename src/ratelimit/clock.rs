//! Wall clock abstraction.
//!
//! Window timestamps are unix milliseconds taken on the limiter side and passed
//! to the store, so every process sharing a store must agree on wall time.

use chrono::Utc;

/// Source of the current time in unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        // Pre-epoch wall clocks clamp to zero.
        Utc::now().timestamp_millis().max(0) as u64
    }
}

#[cfg(any(test, feature = "testing"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "testing"))]
mod manual {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::Clock;

    /// Clock that only moves when told to. Clones share the same time.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        now_ms: Arc<AtomicU64>,
    }

    impl ManualClock {
        pub fn new(start_ms: u64) -> Self {
            Self {
                now_ms: Arc::new(AtomicU64::new(start_ms)),
            }
        }

        pub fn advance(&self, by: Duration) {
            self.now_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }

        pub fn set_ms(&self, now_ms: u64) {
            self.now_ms.store(now_ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.now_ms.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_manual_clock_advances_shared_time() {
        let clock = ManualClock::new(1_000);
        let other = clock.clone();

        clock.advance(Duration::from_secs(2));
        assert_eq!(other.now_ms(), 3_000);

        other.set_ms(10);
        assert_eq!(clock.now_ms(), 10);
    }
}
