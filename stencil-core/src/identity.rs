//! Identity types for STENCIL templates

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// SHA-256 content hash for change detection.
pub type ContentHash = [u8; 32];

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Generate a timestamp-sortable identifier for one logical operation.
/// Used to correlate log lines across the attempts of a single update.
pub fn new_operation_id() -> Uuid {
    Uuid::now_v7()
}

/// Opaque, stable template identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(transparent)]
pub struct TemplateId(String);

impl TemplateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh UUIDv7-backed id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TemplateId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque version token.
///
/// Tokens compare for equality only. A writer can ask whether the version it
/// observed is still the committed one, never which of two versions is newer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token issued for revision `n` by stores that count revisions.
    pub fn from_revision(revision: u64) -> Self {
        Self(format!("v{revision}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_from_revision() {
        assert_eq!(Version::from_revision(1), Version::from("v1"));
        assert_eq!(Version::from_revision(42).as_str(), "v42");
    }

    #[test]
    fn test_template_id_serializes_as_plain_string() {
        let id = TemplateId::from("t1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"t1\"");
        let back: TemplateId = serde_json::from_str("\"t1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        assert_ne!(TemplateId::generate(), TemplateId::generate());
    }

    #[test]
    fn test_content_hash_is_deterministic() {
        let a = compute_content_hash(b"sections");
        let b = compute_content_hash(b"sections");
        let c = compute_content_hash(b"fields");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
