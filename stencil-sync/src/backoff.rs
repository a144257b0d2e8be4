//! Exponential backoff between conflicting attempts.
//!
//! The nominal delay before retry `n` (1-based, counting the attempt that
//! just conflicted) is `base * multiplier^(n-1)`, capped at `max_backoff_ms`.
//! With jitter enabled a uniform random amount in `[0, delay/2]` is added.
//! Every delay handed out is clamped to at least the previous one, so the
//! sequence never decreases even when jitter rolls low.

use rand::Rng;
use std::time::Duration;
use stencil_core::{DurationMs, RetryPolicy};

/// Stateful delay generator for one retry loop.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    base_ms: DurationMs,
    multiplier: f64,
    max_ms: DurationMs,
    jitter: bool,
    previous_ms: DurationMs,
}

impl BackoffSchedule {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            base_ms: policy.base_backoff_ms,
            multiplier: policy.backoff_multiplier,
            max_ms: policy.max_backoff_ms.max(policy.base_backoff_ms),
            jitter: policy.jitter,
            previous_ms: 0,
        }
    }

    /// Delay before retry `attempt` without jitter, capped.
    pub fn nominal_delay_ms(&self, attempt: u32) -> DurationMs {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_ms as f64 * self.multiplier.powi(exponent);
        // `as` saturates, and inf/NaN collapse to the cap via `min`.
        raw.min(self.max_ms as f64).max(0.0) as DurationMs
    }

    /// Next delay using the thread-local RNG.
    pub fn next_delay(&mut self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, &mut rand::rng())
    }

    /// Next delay drawing jitter from `rng`.
    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, attempt: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal_delay_ms(attempt);
        let jittered = if self.jitter && nominal >= 2 {
            nominal.saturating_add(rng.random_range(0..=nominal / 2))
        } else {
            nominal
        };

        let delay = jittered.max(self.previous_ms).min(self.max_ms);
        self.previous_ms = delay;
        Duration::from_millis(delay)
    }
}

// ============================================================================
// TESTS
// ============================================================================
