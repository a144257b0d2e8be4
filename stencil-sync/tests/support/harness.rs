#![allow(dead_code)]

use std::sync::Arc;

use stencil_core::{BackgroundConfig, Clock, StencilConfig, TemplateId};
use stencil_storage::{InMemoryCache, InMemoryVersionedStore};
use stencil_sync::TemplateService;
use stencil_test_utils::fixtures::{fast_retry, intake_template, seeded_scripted_store};
use stencil_test_utils::{BarrierStore, Fault, ManualClock, ScriptedStore};

pub type ScriptedService = TemplateService<ScriptedStore, InMemoryCache>;
pub type RacingService = TemplateService<BarrierStore<InMemoryVersionedStore>, InMemoryCache>;

pub fn t1() -> TemplateId {
    TemplateId::from("t1")
}

/// Fast retries for both writer classes, default cooldown.
pub fn test_config() -> StencilConfig {
    StencilConfig {
        retry: fast_retry(),
        background: BackgroundConfig::default().with_retry(fast_retry()),
        ..StencilConfig::default()
    }
}

pub struct ScriptedHarness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<ScriptedStore>,
    pub service: ScriptedService,
}

/// Service over a scripted store seeded with `t1` at `v1`.
pub fn scripted_service(fault: Fault, config: StencilConfig) -> ScriptedHarness {
    let clock = Arc::new(ManualClock::new());
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let store = Arc::new(seeded_scripted_store(dyn_clock.clone(), fault));
    let cache = Arc::new(InMemoryCache::new(config.cache.clone(), dyn_clock.clone()));
    let service = TemplateService::new(store.clone(), cache, dyn_clock, config)
        .unwrap_or_else(|e| panic!("test config rejected: {e}"));
    ScriptedHarness {
        clock,
        store,
        service,
    }
}

/// Service whose first `writers` reads meet at a barrier, with `t1` at `v1`.
pub fn racing_service(writers: usize) -> (Arc<ManualClock>, RacingService) {
    let clock = Arc::new(ManualClock::new());
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let inner = InMemoryVersionedStore::with_clock(dyn_clock.clone());
    inner
        .insert(intake_template("t1", clock.now()))
        .unwrap_or_else(|e| panic!("seed failed: {e}"));
    let store = Arc::new(BarrierStore::new(inner, writers));
    let config = test_config();
    let cache = Arc::new(InMemoryCache::new(config.cache.clone(), dyn_clock.clone()));
    let service = TemplateService::new(store, cache, dyn_clock, config)
        .unwrap_or_else(|e| panic!("test config rejected: {e}"));
    (clock, service)
}
