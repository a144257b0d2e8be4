//! Read-through cache in front of a [`VersionedStore`].
//!
//! Misses populate the cache through a fill ticket taken before the store
//! read, so a snapshot that raced with a commit is served once to its reader
//! and then discarded instead of being cached.

use std::sync::Arc;

use stencil_core::{Clock, SystemClock, Template, TemplateId};

use super::freshness::{CacheRead, Freshness};
use super::traits::{CacheBackend, CacheStats};
use crate::{StoreResult, VersionedStore};

/// Read-through cache over any [`CacheBackend`].
///
/// The store is passed per call rather than owned.
pub struct ReadThroughCache<C: CacheBackend> {
    cache: Arc<C>,
    clock: Arc<dyn Clock>,
}

impl<C: CacheBackend> Clone for ReadThroughCache<C> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: CacheBackend> ReadThroughCache<C> {
    pub fn new(cache: Arc<C>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    pub fn with_system_clock(cache: Arc<C>) -> Self {
        Self::new(cache, Arc::new(SystemClock))
    }

    /// Get a reference to the cache backend.
    pub fn backend(&self) -> &C {
        &self.cache
    }

    /// Shared handle to the backend, for writers that invalidate.
    pub fn backend_arc(&self) -> Arc<C> {
        Arc::clone(&self.cache)
    }

    /// Get a template, falling back to `store` on a miss.
    ///
    /// Returns `Ok(None)` if the template does not exist in the store.
    pub async fn get<S>(
        &self,
        id: &TemplateId,
        freshness: Freshness,
        store: &S,
    ) -> StoreResult<Option<CacheRead<Template>>>
    where
        S: VersionedStore + ?Sized,
    {
        if let Freshness::BestEffort { max_staleness } = freshness {
            if let Some(entry) = self.cache.get(id) {
                let read = CacheRead::from_cache(entry.template, entry.cached_at);
                if read.staleness(self.clock.now()) <= max_staleness {
                    return Ok(Some(read));
                }
                tracing::trace!(template_id = %id, "Cached snapshot too stale");
            }
        }

        self.fetch_and_fill(id, store).await
    }

    async fn fetch_and_fill<S>(
        &self,
        id: &TemplateId,
        store: &S,
    ) -> StoreResult<Option<CacheRead<Template>>>
    where
        S: VersionedStore + ?Sized,
    {
        let ticket = self.cache.begin_fill(id);
        let read_at = self.clock.now();

        let Some(template) = store.read(id).await? else {
            return Ok(None);
        };

        if !self.cache.fill(ticket, template.clone()) {
            tracing::debug!(
                template_id = %id,
                version = %template.version,
                "Serving uncached snapshot after concurrent invalidation"
            );
        }
        Ok(Some(CacheRead::from_storage(template, read_at)))
    }

    /// Drop one entry, or everything when `id` is `None`.
    pub fn clear(&self, id: Option<&TemplateId>) {
        match id {
            Some(id) => self.cache.invalidate(id),
            None => self.cache.invalidate_all(),
        }
    }

    pub fn invalidate(&self, id: &TemplateId) {
        self.cache.invalidate(id);
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

// ============================================================================
// TESTS
// ============================================================================
