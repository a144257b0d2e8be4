//! In-memory [`CacheBackend`] guarded by a single mutex.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stencil_core::{elapsed_ms, CacheConfig, Clock, SystemClock, Template, TemplateId};

use super::traits::{CacheBackend, CacheEntry, CacheStats, FillTicket};

/// Upper bound on remembered per-key invalidations. Past it the tombstones
/// are dropped and every ticket issued before that point is refused.
pub const MAX_TOMBSTONES: usize = 4_096;

#[derive(Debug)]
struct Live {
    entry: CacheEntry,
    /// Insertion sequence, key into `State::order`.
    seq: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<TemplateId, Live>,
    /// Live entries by insertion sequence, oldest first.
    order: BTreeMap<u64, TemplateId>,
    next_seq: u64,
    /// Stamp of the most recent invalidation of each key.
    tombstones: HashMap<TemplateId, u64>,
    /// Bumped by every invalidation; tickets carry the value at issue time.
    stamp: u64,
    /// Tickets stamped below this are refused.
    floor: u64,
    epoch: u64,
    stats: CacheStats,
}

impl State {
    fn drop_entry(&mut self, id: &TemplateId) -> bool {
        match self.entries.remove(id) {
            Some(live) => {
                self.order.remove(&live.seq);
                true
            }
            None => false,
        }
    }

    fn install(&mut self, id: &TemplateId, entry: CacheEntry, max_entries: usize) {
        self.drop_entry(id);
        self.next_seq += 1;
        let seq = self.next_seq;

        self.entries.insert(id.clone(), Live { entry, seq });
        self.order.insert(seq, id.clone());

        while self.order.len() > max_entries {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            self.stats.evictions += 1;
            tracing::trace!(template_id = %oldest, "Evicted cache entry");
        }
    }

    fn record_invalidation(&mut self, id: &TemplateId) {
        self.stamp += 1;
        if self.tombstones.len() >= MAX_TOMBSTONES && !self.tombstones.contains_key(id) {
            self.tombstones.clear();
            self.floor = self.stamp;
            tracing::debug!(floor = self.floor, "Pruned cache tombstones");
        }
        self.tombstones.insert(id.clone(), self.stamp);
    }

    fn is_stale(&self, ticket: &FillTicket) -> bool {
        ticket.epoch != self.epoch
            || ticket.stamp < self.floor
            || self
                .tombstones
                .get(&ticket.id)
                .is_some_and(|&invalidated| invalidated > ticket.stamp)
    }
}

/// In-memory template cache.
///
/// An entry older than `entry_ttl_ms` is a miss (a TTL of zero disables
/// expiry). Once `max_entries` live entries exist, inserting another evicts
/// the oldest-inserted one. Bookkeeping for keys without an entry is capped
/// at [`MAX_TOMBSTONES`], so lookups of unknown ids leave nothing behind.
pub struct InMemoryCache {
    state: Mutex<State>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl InMemoryCache {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            config,
            clock,
        }
    }

    /// Default configuration on the system clock.
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default(), Arc::new(SystemClock))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.config.entry_ttl_ms > 0
            && elapsed_ms(entry.cached_at, self.clock.now()) >= self.config.entry_ttl_ms
    }
}

impl CacheBackend for InMemoryCache {
    fn get(&self, id: &TemplateId) -> Option<CacheEntry> {
        let mut state = self.lock();

        let cached = state.entries.get(id).map(|live| live.entry.clone());

        match cached {
            Some(entry) if !self.is_expired(&entry) => {
                state.stats.hits += 1;
                Some(entry)
            }
            Some(_) => {
                state.drop_entry(id);
                state.stats.misses += 1;
                tracing::trace!(template_id = %id, "Cache entry expired");
                None
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    fn put(&self, id: &TemplateId, template: Template) {
        let entry = CacheEntry::new(template, self.clock.now());
        let max_entries = self.config.max_entries;
        self.lock().install(id, entry, max_entries);
    }

    fn begin_fill(&self, id: &TemplateId) -> FillTicket {
        let state = self.lock();
        FillTicket {
            id: id.clone(),
            stamp: state.stamp,
            epoch: state.epoch,
        }
    }

    fn fill(&self, ticket: FillTicket, template: Template) -> bool {
        let mut state = self.lock();

        if state.is_stale(&ticket) {
            state.stats.rejected_fills += 1;
            tracing::debug!(
                template_id = %ticket.id,
                version = %template.version,
                "Refused stale cache fill"
            );
            return false;
        }

        let entry = CacheEntry::new(template, self.clock.now());
        state.install(&ticket.id, entry, self.config.max_entries);
        state.stats.fills += 1;
        true
    }

    fn invalidate(&self, id: &TemplateId) {
        let mut state = self.lock();
        state.record_invalidation(id);
        state.drop_entry(id);
        state.stats.invalidations += 1;
    }

    fn invalidate_all(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
        state.tombstones.clear();
        state.epoch += 1;
        state.stats.invalidations += 1;
    }

    fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entry_count: state.order.len() as u64,
            ..state.stats
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use stencil_core::Version;

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8),
        Invalidate(u8),
        Fill { key: u8, invalidate_first: bool },
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6).prop_map(Op::Put),
            (0u8..6).prop_map(Op::Invalidate),
            (0u8..6, any::<bool>()).prop_map(|(key, invalidate_first)| Op::Fill {
                key,
                invalidate_first
            }),
        ]
    }

    proptest! {
        #[test]
        fn prop_capacity_and_fill_guard(ops in prop::collection::vec(op(), 1..64), cap in 1usize..4) {
            let cache = InMemoryCache::new(
                CacheConfig::new().with_max_entries(cap),
                Arc::new(SystemClock),
            );

            for op in ops {
                match op {
                    Op::Put(k) => {
                        let id = TemplateId::new(format!("k{k}"));
                        cache.put(&id, Template::new(id.clone(), "p", Utc::now()));
                    }
                    Op::Invalidate(k) => {
                        let id = TemplateId::new(format!("k{k}"));
                        cache.invalidate(&id);
                        prop_assert!(cache.get(&id).is_none());
                    }
                    Op::Fill { key, invalidate_first } => {
                        let id = TemplateId::new(format!("k{key}"));
                        let ticket = cache.begin_fill(&id);
                        if invalidate_first {
                            cache.invalidate(&id);
                        }
                        let mut t = Template::new(id.clone(), "f", Utc::now());
                        t.version = Version::from("vfill");
                        let installed = cache.fill(ticket, t);
                        prop_assert_eq!(installed, !invalidate_first);
                    }
                }
                prop_assert!(cache.stats().entry_count as usize <= cap);
            }
        }
    }
}
