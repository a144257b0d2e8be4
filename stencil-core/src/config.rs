//! Configuration types
//!
//! All durations are milliseconds. Every struct has a `Default`, deserializes
//! from camelCase keys (TOML or JSON) and can be overlaid from `STENCIL_*`
//! environment variables.

use crate::{ConfigError, DurationMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_BACKOFF_MS: DurationMs = 100;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_DEADLINE_MS: DurationMs = 3_000;
pub const DEFAULT_MAX_BACKOFF_MS: DurationMs = 2_000;

pub const DEFAULT_COOLDOWN_MS: DurationMs = 5_000;
pub const DEFAULT_BACKGROUND_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_SWEEP_INTERVAL_MS: DurationMs = 30_000;

pub const DEFAULT_CACHE_TTL_MS: DurationMs = 300_000;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;

/// Retry policy for conditional writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Upper bound on conditional-write attempts, including the first.
    pub max_attempts: u32,
    pub base_backoff_ms: DurationMs,
    pub backoff_multiplier: f64,
    /// Add up to half of each delay as random jitter.
    pub jitter: bool,
    /// Wall-clock budget for the whole retry loop.
    pub deadline_ms: DurationMs,
    /// Cap applied to every individual delay.
    pub max_backoff_ms: DurationMs,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: false,
            deadline_ms: DEFAULT_DEADLINE_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// Policy used by the background writer: fewer attempts, shorter waits.
    pub fn background() -> Self {
        Self {
            max_attempts: DEFAULT_BACKGROUND_MAX_ATTEMPTS,
            base_backoff_ms: 50,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: false,
            deadline_ms: 2_000,
            max_backoff_ms: 1_000,
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(invalid("maxAttempts", self.max_attempts, "must be at least 1"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid(
                "backoffMultiplier",
                self.backoff_multiplier,
                "must be a finite number >= 1.0",
            ));
        }
        if self.max_backoff_ms < self.base_backoff_ms {
            return Err(invalid(
                "maxBackoffMs",
                self.max_backoff_ms,
                "must be >= baseBackoffMs",
            ));
        }
        Ok(())
    }
}

/// Per-call overrides for [`RetryPolicy`]. Absent fields keep the service default.
///
/// Every delay is capped at `maxBackoffMs` (service default 2000). A caller
/// raising `maxAttempts` and wanting the uncapped `base * multiplier^(n-1)`
/// progression should raise the cap too with [`UpdateOptions::with_max_backoff_ms`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateOptions {
    pub max_attempts: Option<u32>,
    pub base_backoff_ms: Option<DurationMs>,
    pub backoff_multiplier: Option<f64>,
    pub jitter: Option<bool>,
    pub deadline_ms: Option<DurationMs>,
    pub max_backoff_ms: Option<DurationMs>,
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_base_backoff_ms(mut self, ms: DurationMs) -> Self {
        self.base_backoff_ms = Some(ms);
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    pub fn with_deadline_ms(mut self, ms: DurationMs) -> Self {
        self.deadline_ms = Some(ms);
        self
    }

    pub fn with_max_backoff_ms(mut self, ms: DurationMs) -> Self {
        self.max_backoff_ms = Some(ms);
        self
    }

    /// Overlay these options on `base`. The cap is raised to the base delay
    /// when an override would otherwise leave it below.
    pub fn resolve(&self, base: &RetryPolicy) -> RetryPolicy {
        let base_backoff_ms = self.base_backoff_ms.unwrap_or(base.base_backoff_ms);
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            base_backoff_ms,
            backoff_multiplier: self.backoff_multiplier.unwrap_or(base.backoff_multiplier),
            jitter: self.jitter.unwrap_or(base.jitter),
            deadline_ms: self.deadline_ms.unwrap_or(base.deadline_ms),
            max_backoff_ms: self
                .max_backoff_ms
                .unwrap_or(base.max_backoff_ms)
                .max(base_backoff_ms),
        }
    }
}

/// Background writer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default, rename_all = "camelCase")]
pub struct BackgroundConfig {
    /// Minimum time since the last live edit before a background write.
    pub cooldown_ms: DurationMs,
    /// Period of the scheduled sweep over every template.
    pub sweep_interval_ms: DurationMs,
    pub retry: RetryPolicy,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            retry: RetryPolicy::background(),
        }
    }
}

impl BackgroundConfig {
    pub fn with_cooldown_ms(mut self, ms: DurationMs) -> Self {
        self.cooldown_ms = ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_ms == 0 {
            return Err(invalid("sweepIntervalMs", self.sweep_interval_ms, "must be positive"));
        }
        self.retry.validate()
    }
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Entries older than this are treated as misses.
    pub entry_ttl_ms: DurationMs,
    /// Oldest entry is evicted once this many are cached.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl_ms: DEFAULT_CACHE_TTL_MS,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl_ms(mut self, ms: DurationMs) -> Self {
        self.entry_ttl_ms = ms;
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(invalid("maxEntries", self.max_entries, "must be at least 1"));
        }
        Ok(())
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(default, rename_all = "camelCase")]
pub struct StencilConfig {
    pub retry: RetryPolicy,
    pub background: BackgroundConfig,
    pub cache: CacheConfig,
}

impl StencilConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create StencilConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `STENCIL_MAX_ATTEMPTS` (default: 3)
    /// - `STENCIL_BASE_BACKOFF_MS` (default: 100)
    /// - `STENCIL_BACKOFF_MULTIPLIER` (default: 2.0)
    /// - `STENCIL_JITTER` (default: false)
    /// - `STENCIL_DEADLINE_MS` (default: 3000)
    /// - `STENCIL_MAX_BACKOFF_MS` (default: 2000)
    /// - `STENCIL_BG_COOLDOWN_MS` (default: 5000)
    /// - `STENCIL_BG_MAX_ATTEMPTS` (default: 2)
    /// - `STENCIL_BG_SWEEP_INTERVAL_MS` (default: 30000)
    /// - `STENCIL_CACHE_TTL_MS` (default: 300000)
    /// - `STENCIL_CACHE_MAX_ENTRIES` (default: 10000)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let retry = RetryPolicy {
            max_attempts: parse_or(&lookup, "STENCIL_MAX_ATTEMPTS", defaults.retry.max_attempts),
            base_backoff_ms: parse_or(&lookup, "STENCIL_BASE_BACKOFF_MS", defaults.retry.base_backoff_ms),
            backoff_multiplier: parse_or(
                &lookup,
                "STENCIL_BACKOFF_MULTIPLIER",
                defaults.retry.backoff_multiplier,
            ),
            jitter: lookup("STENCIL_JITTER")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(defaults.retry.jitter),
            deadline_ms: parse_or(&lookup, "STENCIL_DEADLINE_MS", defaults.retry.deadline_ms),
            max_backoff_ms: parse_or(&lookup, "STENCIL_MAX_BACKOFF_MS", defaults.retry.max_backoff_ms),
        };

        let background = BackgroundConfig {
            cooldown_ms: parse_or(&lookup, "STENCIL_BG_COOLDOWN_MS", defaults.background.cooldown_ms),
            sweep_interval_ms: parse_or(
                &lookup,
                "STENCIL_BG_SWEEP_INTERVAL_MS",
                defaults.background.sweep_interval_ms,
            ),
            retry: RetryPolicy {
                max_attempts: parse_or(
                    &lookup,
                    "STENCIL_BG_MAX_ATTEMPTS",
                    defaults.background.retry.max_attempts,
                ),
                ..defaults.background.retry.clone()
            },
        };

        let cache = CacheConfig {
            entry_ttl_ms: parse_or(&lookup, "STENCIL_CACHE_TTL_MS", defaults.cache.entry_ttl_ms),
            max_entries: parse_or(&lookup, "STENCIL_CACHE_MAX_ENTRIES", defaults.cache.max_entries),
        };

        Self {
            retry,
            background,
            cache,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        self.background.validate()?;
        self.cache.validate()
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
