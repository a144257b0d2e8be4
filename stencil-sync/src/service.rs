//! Client-facing facade.
//!
//! [`TemplateService`] owns one store, one cache and one clock and wires the
//! coordinator and background processor over them. Every instance is
//! independent; nothing is process-global.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stencil_core::{
    Clock, ConfigError, ProcessOutcome, StencilConfig, StoreError, SweepReport, SystemClock,
    Template, TemplateId, TemplatePatch, UpdateError, UpdateOptions, UpdateResponse,
    UpdateSuccess,
};
use stencil_storage::{
    CacheBackend, CacheRead, CacheStats, Freshness, InMemoryCache, InMemoryVersionedStore,
    ReadThroughCache, StoreResult, VersionedStore,
};

use crate::background::BackgroundProcessor;
use crate::coordinator::UpdateCoordinator;

/// Service over the in-memory store and cache.
pub type InMemoryTemplateService = TemplateService<InMemoryVersionedStore, InMemoryCache>;

pub struct TemplateService<S: VersionedStore + ?Sized, C: CacheBackend> {
    store: Arc<S>,
    cache: ReadThroughCache<C>,
    coordinator: UpdateCoordinator<S, C>,
    processor: Arc<BackgroundProcessor<S, C>>,
    clock: Arc<dyn Clock>,
    config: StencilConfig,
}

impl TemplateService<InMemoryVersionedStore, InMemoryCache> {
    /// Empty in-memory service on the system clock.
    pub fn in_memory(config: StencilConfig) -> Result<Self, ConfigError> {
        Self::in_memory_with_clock(Arc::new(SystemClock), config)
    }

    pub fn in_memory_with_clock(
        clock: Arc<dyn Clock>,
        config: StencilConfig,
    ) -> Result<Self, ConfigError> {
        let store = Arc::new(InMemoryVersionedStore::with_clock(clock.clone()));
        let cache = Arc::new(InMemoryCache::new(config.cache.clone(), clock.clone()));
        Self::new(store, cache, clock, config)
    }
}

impl<S: VersionedStore + ?Sized, C: CacheBackend> TemplateService<S, C> {
    /// Wire a service over `store` and `cache`. Rejects an invalid `config`.
    pub fn new(
        store: Arc<S>,
        cache: Arc<C>,
        clock: Arc<dyn Clock>,
        config: StencilConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let cache = ReadThroughCache::new(cache, clock.clone());
        let coordinator = UpdateCoordinator::new(
            store.clone(),
            cache.clone(),
            clock.clone(),
            config.retry.clone(),
        );
        let processor = Arc::new(BackgroundProcessor::new(
            store.clone(),
            cache.clone(),
            clock.clone(),
            config.background.clone(),
        ));

        Ok(Self {
            store,
            cache,
            coordinator,
            processor,
            clock,
            config,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &StencilConfig {
        &self.config
    }

    /// Shared handle for [`crate::background_sweep_task`].
    pub fn processor(&self) -> Arc<BackgroundProcessor<S, C>> {
        Arc::clone(&self.processor)
    }

    /// Current snapshot of `id`, served from the cache when possible.
    ///
    /// Returns `Ok(None)` for an unknown id.
    pub async fn get_template(&self, id: &TemplateId) -> StoreResult<Option<Template>> {
        let read = self.get_template_with(id, self.default_freshness()).await?;
        Ok(read.map(CacheRead::into_value))
    }

    /// Read with an explicit freshness requirement, keeping cache metadata.
    pub async fn get_template_with(
        &self,
        id: &TemplateId,
        freshness: Freshness,
    ) -> StoreResult<Option<CacheRead<Template>>> {
        self.cache.get(id, freshness, &*self.store).await
    }

    fn default_freshness(&self) -> Freshness {
        // Expiry is enforced by the backend; a zero TTL means no bound.
        match self.config.cache.entry_ttl_ms {
            0 => Freshness::best_effort(Duration::MAX),
            ttl => Freshness::best_effort(Duration::from_millis(ttl)),
        }
    }

    pub async fn update_template(
        &self,
        id: &TemplateId,
        patch: TemplatePatch,
        options: Option<UpdateOptions>,
    ) -> Result<UpdateSuccess, UpdateError> {
        self.coordinator
            .update_template(id, patch, options.as_ref())
            .await
    }

    /// Apply an untyped change map and report the wire-shaped result.
    ///
    /// Unknown keys fail validation before any store access.
    pub async fn update_template_json(
        &self,
        id: &TemplateId,
        changes: Value,
        options: Option<UpdateOptions>,
    ) -> UpdateResponse {
        let result = match TemplatePatch::from_json(changes) {
            Ok(patch) => self.update_template(id, patch, options).await,
            Err(err) => {
                tracing::debug!(template_id = %id, error = %err, "Rejected change map");
                Err(UpdateError::from(err))
            }
        };
        UpdateResponse::from(result)
    }

    /// Drop the cached entry for `id`, or every entry when `id` is `None`.
    pub fn clear_cache(&self, id: Option<&TemplateId>) {
        tracing::debug!(template_id = ?id.map(TemplateId::as_str), "Clearing cache");
        self.cache.clear(id);
    }

    pub async fn process_record(&self, id: &TemplateId) -> ProcessOutcome {
        self.processor.process_record(id).await
    }

    pub async fn process_all(&self) -> Result<SweepReport, StoreError> {
        self.processor.process_all().await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

// ============================================================================
// TESTS
// ============================================================================
