//! In-memory [`VersionedStore`].
//!
//! Records live in a single `RwLock<HashMap>`. A conditional write holds the
//! write lock across the version check and the apply, which is what makes it
//! atomic. Versions are `v{revision}` with a per-record revision counter, so a
//! token is never reused even if a change set is a no-op.

use crate::{CasOutcome, StoreResult, StoreStats, VersionedStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use stencil_core::{
    ChangeSet, Clock, StoreError, SystemClock, Template, TemplateId, Version,
};

#[derive(Debug, Clone)]
struct StoredRecord {
    template: Template,
    revision: u64,
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    write_attempts: AtomicU64,
    commits: AtomicU64,
    conflicts: AtomicU64,
}

/// In-memory versioned store.
pub struct InMemoryVersionedStore {
    records: RwLock<HashMap<TemplateId, StoredRecord>>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl Default for InMemoryVersionedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVersionedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVersionedStore")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl InMemoryVersionedStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that stamps `updated_at` from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
            counters: Counters::default(),
        }
    }

    /// Seed a new record. The stored copy always starts at `v1`.
    pub fn insert(&self, template: Template) -> StoreResult<Template> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        if records.contains_key(&template.id) {
            return Err(StoreError::AlreadyExists {
                id: template.id.clone(),
            });
        }

        let mut template = template;
        template.version = Version::from_revision(1);
        records.insert(
            template.id.clone(),
            StoredRecord {
                template: template.clone(),
                revision: 1,
            },
        );
        Ok(template)
    }

    /// Number of stored records.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self
            .records
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every record and reset the counters.
    pub fn clear(&self) -> StoreResult<()> {
        self.records
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .clear();
        self.counters.reads.store(0, Ordering::Relaxed);
        self.counters.write_attempts.store(0, Ordering::Relaxed);
        self.counters.commits.store(0, Ordering::Relaxed);
        self.counters.conflicts.store(0, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            write_attempts: self.counters.write_attempts.load(Ordering::Relaxed),
            commits: self.counters.commits.load(Ordering::Relaxed),
            conflicts: self.counters.conflicts.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl VersionedStore for InMemoryVersionedStore {
    async fn read(&self, id: &TemplateId) -> StoreResult<Option<Template>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.get(id).map(|r| r.template.clone()))
    }

    async fn conditional_write(
        &self,
        id: &TemplateId,
        changes: &ChangeSet,
        expected: &Version,
    ) -> StoreResult<CasOutcome> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { id: id.clone() })?;

        self.counters.write_attempts.fetch_add(1, Ordering::Relaxed);

        if &record.template.version != expected {
            self.counters.conflicts.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                template_id = %id,
                expected = %expected,
                current = %record.template.version,
                "Conditional write rejected"
            );
            return Ok(CasOutcome::Conflict {
                current_version: record.template.version.clone(),
            });
        }

        changes.apply_to(&mut record.template, self.clock.now());
        record.revision += 1;
        record.template.version = Version::from_revision(record.revision);
        self.counters.commits.fetch_add(1, Ordering::Relaxed);

        Ok(CasOutcome::Committed(record.template.clone()))
    }

    async fn list_ids(&self) -> StoreResult<Vec<TemplateId>> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.keys().cloned().collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================
