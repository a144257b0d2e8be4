//! Time source for retry loops and cooldown checks.
//!
//! The coordinator and background processor never call `Utc::now()` or
//! `tokio::time::sleep` directly. They go through a [`Clock`], so tests can
//! run whole retry sequences on virtual time.

use crate::Timestamp;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

/// Source of "now" plus a cooperative wait.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> Timestamp;

    /// Wait for `duration` without blocking the executor or holding locks.
    async fn sleep(&self, duration: Duration);
}

/// Real time backed by `chrono` and the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
