//! Virtual clock for retry and cooldown tests.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use stencil_core::{Clock, Timestamp};

/// Clock whose time only moves when advanced or slept on.
///
/// `sleep` advances the clock by the requested duration, records it, and
/// yields once so other tasks get a turn. A retry loop against this clock
/// finishes instantly while still observing the deadline arithmetic.
#[derive(Debug)]
pub struct ManualClock {
    start: Timestamp,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            start,
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Total virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let offset = *self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        self.start + ChronoDuration::from_std(offset).unwrap_or_else(|_| ChronoDuration::zero())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap_or_else(PoisonError::into_inner).push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_advances_and_records() {
        let clock = ManualClock::new();
        let t0 = clock.now();

        clock.sleep(Duration::from_millis(100)).await;
        clock.sleep(Duration::from_millis(200)).await;

        assert_eq!(clock.now() - t0, ChronoDuration::milliseconds(300));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[test]
    fn test_advance_does_not_record_sleep() {
        let clock = ManualClock::new();
        clock.advance_ms(5_000);
        assert!(clock.sleeps().is_empty());
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }
}
