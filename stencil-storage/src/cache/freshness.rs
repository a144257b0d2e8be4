//! Freshness contracts for cache reads.
//!
//! Callers state how stale a snapshot they accept; reads come back wrapped
//! in [`CacheRead`] so the answer carries its own age.

use std::time::Duration;

use stencil_core::{elapsed_ms, Timestamp};

/// Freshness requirement for cache reads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Accept a cached snapshot no older than `max_staleness`.
    ///
    /// Anything older is re-read from the store and the cache refilled.
    BestEffort {
        /// Maximum acceptable staleness for cached data.
        max_staleness: Duration,
    },

    /// Skip the cache and read the committed record from the store.
    ///
    /// The result still refills the cache for later best-effort readers.
    #[default]
    Consistent,
}

impl Freshness {
    /// Create a BestEffort freshness with the given max staleness.
    pub fn best_effort(max_staleness: Duration) -> Self {
        Self::BestEffort { max_staleness }
    }

    pub fn consistent() -> Self {
        Self::Consistent
    }

    pub fn is_best_effort(&self) -> bool {
        matches!(self, Self::BestEffort { .. })
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self, Self::Consistent)
    }

    /// Get the max staleness for BestEffort, or zero for Consistent.
    pub fn max_staleness(&self) -> Duration {
        match self {
            Self::BestEffort { max_staleness } => *max_staleness,
            Self::Consistent => Duration::ZERO,
        }
    }
}

/// Result of a cache read, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    /// When this value was cached, or read from the store on a miss.
    cached_at: Timestamp,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// Value served from the cache.
    pub fn from_cache(value: T, cached_at: Timestamp) -> Self {
        Self {
            value,
            cached_at,
            was_cache_hit: true,
        }
    }

    /// Value read from the store at `read_at`.
    pub fn from_storage(value: T, read_at: Timestamp) -> Self {
        Self {
            value,
            cached_at: read_at,
            was_cache_hit: false,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    /// How old the value is as of `now`.
    pub fn staleness(&self, now: Timestamp) -> Duration {
        Duration::from_millis(elapsed_ms(self.cached_at, now))
    }

    /// Transform the value, keeping the metadata.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> CacheRead<U> {
        CacheRead {
            value: f(self.value),
            cached_at: self.cached_at,
            was_cache_hit: self.was_cache_hit,
        }
    }
}
