//! STENCIL Storage - Versioned Store Trait, In-Memory Store and Cache
//!
//! Defines the storage abstraction every writer goes through. The only
//! synchronization primitive offered is [`VersionedStore::conditional_write`],
//! an atomic compare-and-swap over a whole record.

pub mod cache;
pub mod memory;

pub use cache::{
    CacheBackend, CacheEntry, CacheRead, CacheStats, FillTicket, Freshness, InMemoryCache,
    ReadThroughCache,
};
pub use memory::InMemoryVersionedStore;

use async_trait::async_trait;
use std::sync::Arc;
use stencil_core::{ChangeSet, StoreError, Template, TemplateId, Version};

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// CONDITIONAL WRITE OUTCOME
// ============================================================================

/// Outcome of a conditional write that reached the store.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The expected version matched; the change is committed.
    Committed(Template),
    /// Another writer committed first. Nothing was applied.
    Conflict { current_version: Version },
}

impl CasOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Durable key/value store over whole template records.
///
/// # Contract
///
/// `conditional_write` is atomic: the version check and the field update are
/// one indivisible step. No caller can observe a half-applied change, and of
/// two concurrent writes carrying the same `expected` version at most one
/// commits. Every commit installs a version token never used before for that
/// record.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Read the committed record. `Ok(None)` when the id is unknown.
    async fn read(&self, id: &TemplateId) -> StoreResult<Option<Template>>;

    /// Apply `changes` only if the committed version still equals `expected`.
    ///
    /// Returns `Err(StoreError::NotFound)` if the record does not exist.
    async fn conditional_write(
        &self,
        id: &TemplateId,
        changes: &ChangeSet,
        expected: &Version,
    ) -> StoreResult<CasOutcome>;

    /// Every stored id, in no particular order.
    async fn list_ids(&self) -> StoreResult<Vec<TemplateId>>;
}

#[async_trait]
impl<S: VersionedStore + ?Sized> VersionedStore for Arc<S> {
    async fn read(&self, id: &TemplateId) -> StoreResult<Option<Template>> {
        (**self).read(id).await
    }

    async fn conditional_write(
        &self,
        id: &TemplateId,
        changes: &ChangeSet,
        expected: &Version,
    ) -> StoreResult<CasOutcome> {
        (**self).conditional_write(id, changes, expected).await
    }

    async fn list_ids(&self) -> StoreResult<Vec<TemplateId>> {
        (**self).list_ids().await
    }
}

/// Counters kept by store implementations that track their traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: u64,
    /// Conditional writes that reached the version check.
    pub write_attempts: u64,
    pub commits: u64,
    pub conflicts: u64,
}
