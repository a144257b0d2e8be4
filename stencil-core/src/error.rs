//! Error types for STENCIL operations

use crate::{TemplateId, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage layer errors. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Template not found: {id}")]
    NotFound { id: TemplateId },

    #[error("Template already exists: {id}")]
    AlreadyExists { id: TemplateId },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store backend error: {reason}")]
    Backend { reason: String },
}

/// Validation errors for incoming change sets.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown field in change set: {field}")]
    UnknownField { field: String },

    #[error("Invalid change set: {reason}")]
    InvalidPatch { reason: String },

    #[error("Change set is empty")]
    EmptyPatch,

    #[error("Invalid update options: {0}")]
    InvalidOptions(#[from] ConfigError),
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Flat discriminator of [`UpdateError`], suitable for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Exhausted,
    Timeout,
    NotFound,
    Store,
    Validation,
}

/// Terminal failure of an update.
///
/// Every variant reached after at least one store round-trip carries the
/// attempt count and the last version observed, so a caller can tell what
/// happened without retrying blindly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpdateError {
    #[error("Gave up after {attempts} conflicting attempts (last seen version {last_version})")]
    Exhausted { attempts: u32, last_version: Version },

    #[error(
        "Deadline of {deadline_ms}ms exceeded after {attempts} attempts and {elapsed_ms}ms{}",
        last_seen_suffix(.last_version)
    )]
    Timeout {
        attempts: u32,
        elapsed_ms: u64,
        deadline_ms: u64,
        last_version: Option<Version>,
    },

    #[error("Template not found: {id}")]
    NotFound {
        id: TemplateId,
        attempts: u32,
        last_version: Option<Version>,
    },

    #[error("Store failure on attempt {attempts}: {source}")]
    Store {
        #[source]
        source: StoreError,
        attempts: u32,
        last_version: Option<Version>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

fn last_seen_suffix(version: &Option<Version>) -> String {
    version
        .as_ref()
        .map(|v| format!(" (last seen version {v})"))
        .unwrap_or_default()
}

impl UpdateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Exhausted { .. } => ErrorKind::Exhausted,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Store { .. } => ErrorKind::Store,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Number of conditional-write attempts made before failing.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::Timeout { attempts, .. }
            | Self::NotFound { attempts, .. }
            | Self::Store { attempts, .. } => *attempts,
            Self::Validation(_) => 0,
        }
    }

    /// Last committed version the writer observed, if any.
    pub fn last_version(&self) -> Option<&Version> {
        match self {
            Self::Exhausted { last_version, .. } => Some(last_version),
            Self::Timeout { last_version, .. }
            | Self::NotFound { last_version, .. }
            | Self::Store { last_version, .. } => last_version.as_ref(),
            Self::Validation(_) => None,
        }
    }
}

/// Master error type for all STENCIL errors.
#[derive(Debug, Clone, Error)]
pub enum StencilError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Update error: {0}")]
    Update(#[from] UpdateError),
}

/// Result type alias for STENCIL operations.
pub type StencilResult<T> = Result<T, StencilError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_not_found() {
        let err = StoreError::NotFound {
            id: TemplateId::from("t1"),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("not found"));
        assert!(msg.contains("t1"));
    }

    #[test]
    fn test_exhausted_reports_attempts_and_version() {
        let err = UpdateError::Exhausted {
            attempts: 3,
            last_version: Version::from("v7"),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3"));
        assert!(msg.contains("v7"));
        assert_eq!(err.kind(), ErrorKind::Exhausted);
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.last_version(), Some(&Version::from("v7")));
    }

    #[test]
    fn test_timeout_display_without_version() {
        let err = UpdateError::Timeout {
            attempts: 1,
            elapsed_ms: 3100,
            deadline_ms: 3000,
            last_version: None,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3000ms"));
        assert!(!msg.contains("last seen"));
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_store_variant_keeps_source() {
        let err = UpdateError::Store {
            source: StoreError::Unavailable {
                reason: "disk full".to_string(),
            },
            attempts: 1,
            last_version: Some(Version::from("v1")),
        };
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Store unavailable: disk full"));
        assert_eq!(err.kind(), ErrorKind::Store);
    }

    #[test]
    fn test_error_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::Exhausted).unwrap(),
            "\"EXHAUSTED\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::NotFound).unwrap(),
            "\"NOT_FOUND\""
        );
    }

    #[test]
    fn test_not_found_after_writes_keeps_attempts() {
        let err = UpdateError::NotFound {
            id: TemplateId::from("t1"),
            attempts: 2,
            last_version: Some(Version::from("v3")),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.attempts(), 2);
        assert_eq!(err.last_version(), Some(&Version::from("v3")));
    }

    #[test]
    fn test_stencil_error_from_variants() {
        let store = StencilError::from(StoreError::LockPoisoned);
        assert!(matches!(store, StencilError::Store(_)));

        let validation = StencilError::from(ValidationError::EmptyPatch);
        assert!(matches!(validation, StencilError::Validation(_)));

        let config = StencilError::from(ConfigError::Parse {
            reason: "bad toml".to_string(),
        });
        assert!(matches!(config, StencilError::Config(_)));

        let update = StencilError::from(UpdateError::NotFound {
            id: TemplateId::from("t1"),
            attempts: 0,
            last_version: None,
        });
        assert!(matches!(update, StencilError::Update(_)));
    }
}
