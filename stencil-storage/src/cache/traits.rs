//! Cache backend trait and the values it hands out.

use stencil_core::{Template, TemplateId, Timestamp, Version};

/// Cached snapshot of a template.
///
/// Entries are never mutated in place. They are replaced or deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub template: Template,
    /// Version of `template` at the time it was cached.
    pub version: Version,
    pub cached_at: Timestamp,
}

impl CacheEntry {
    pub fn new(template: Template, cached_at: Timestamp) -> Self {
        Self {
            version: template.version.clone(),
            template,
            cached_at,
        }
    }
}

/// Permission to populate one key, taken before the store read.
///
/// Carries the cache's invalidation stamp and epoch at issue time. Any
/// invalidation of the key (or of the whole cache) afterwards makes the
/// ticket stale and the fill is refused. A backend may also refuse a stale
/// ticket it can no longer vouch for; a refused fill only costs a miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillTicket {
    pub(crate) id: TemplateId,
    pub(crate) stamp: u64,
    pub(crate) epoch: u64,
}

impl FillTicket {
    pub fn id(&self) -> &TemplateId {
        &self.id
    }
}

/// Cache backend for template snapshots.
///
/// Every operation is synchronous and must never touch the store. An
/// `invalidate` that has returned is visible to every later `get`.
pub trait CacheBackend: Send + Sync {
    /// Pure lookup. Expired entries count as a miss.
    fn get(&self, id: &TemplateId) -> Option<CacheEntry>;

    /// Insert or replace unconditionally.
    fn put(&self, id: &TemplateId, template: Template);

    /// Take a ticket for a read-through fill of `id`.
    fn begin_fill(&self, id: &TemplateId) -> FillTicket;

    /// Install `template` if no invalidation happened since `ticket` was
    /// issued. Returns whether the entry was installed.
    fn fill(&self, ticket: FillTicket, template: Template) -> bool;

    /// Remove the entry for `id`. Idempotent.
    fn invalidate(&self, id: &TemplateId);

    /// Remove every entry.
    fn invalidate_all(&self);

    fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, including expired entries.
    pub misses: u64,
    /// Fills that were installed.
    pub fills: u64,
    /// Fills refused because of an intervening invalidation.
    pub rejected_fills: u64,
    pub invalidations: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
