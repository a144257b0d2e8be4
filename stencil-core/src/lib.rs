//! STENCIL Core - Template Types
//!
//! Data structures shared by every STENCIL crate: the versioned template
//! record, the typed change sets writers submit, the error hierarchy, the
//! configuration surface and the clock seam used by the retry loops.
//! No storage or coordination logic lives here.

pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod outcome;
pub mod patch;
pub mod template;

pub use clock::{Clock, SystemClock};
pub use config::{BackgroundConfig, CacheConfig, RetryPolicy, StencilConfig, UpdateOptions};
pub use error::{
    ConfigError, ErrorKind, StencilError, StencilResult, StoreError, UpdateError, ValidationError,
};
pub use identity::{compute_content_hash, new_operation_id, ContentHash, TemplateId, Version};
pub use outcome::{
    ErrorReport, ProcessOutcome, SkipReason, SweepReport, UpdateResponse, UpdateSuccess,
};
pub use patch::{ChangeSet, TemplatePatch, WriteOrigin};
pub use template::{DerivedFields, FieldDefinition, FieldKind, Section, Template};

use chrono::{DateTime, Utc};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Duration in milliseconds for backoff, cooldown and deadline values.
pub type DurationMs = u64;

/// Milliseconds elapsed between two timestamps, clamped at zero.
pub fn elapsed_ms(since: Timestamp, now: Timestamp) -> DurationMs {
    now.signed_duration_since(since)
        .num_milliseconds()
        .max(0) as DurationMs
}
