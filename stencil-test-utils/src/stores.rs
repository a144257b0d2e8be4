//! Fault-injecting [`VersionedStore`] wrappers.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use stencil_core::{
    ChangeSet, Clock, StoreError, Template, TemplateId, TemplatePatch, Version,
};
use stencil_storage::{CasOutcome, InMemoryVersionedStore, StoreResult, VersionedStore};
use tokio::sync::Barrier;

/// Misbehaviour injected by [`ScriptedStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Behave like the inner store.
    None,
    /// Reject every conditional write as a conflict without applying it.
    AlwaysConflict,
    /// Commit a competing live edit before each of the first `n` writes, so
    /// those writes lose a real race.
    InterleaveLiveEdits(u32),
    /// Fail every conditional write with this error.
    FailWrites(StoreError),
    /// Fail every read with this error.
    FailReads(StoreError),
}

/// In-memory store with a scripted fault and call counters.
pub struct ScriptedStore {
    inner: InMemoryVersionedStore,
    clock: Arc<dyn Clock>,
    fault: Mutex<Fault>,
    reads: AtomicU32,
    writes: AtomicU32,
    interleaved: AtomicU32,
}

impl ScriptedStore {
    pub fn new(clock: Arc<dyn Clock>, fault: Fault) -> Self {
        Self {
            inner: InMemoryVersionedStore::with_clock(Arc::clone(&clock)),
            clock,
            fault: Mutex::new(fault),
            reads: AtomicU32::new(0),
            writes: AtomicU32::new(0),
            interleaved: AtomicU32::new(0),
        }
    }

    pub fn insert(&self, template: Template) -> StoreResult<Template> {
        self.inner.insert(template)
    }

    pub fn set_fault(&self, fault: Fault) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = fault;
    }

    /// Calls to `read`.
    pub fn read_calls(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Calls to `conditional_write` made by the code under test.
    pub fn write_calls(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Competing edits committed by [`Fault::InterleaveLiveEdits`].
    pub fn interleaved_edits(&self) -> u32 {
        self.interleaved.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryVersionedStore {
        &self.inner
    }

    fn fault(&self) -> Fault {
        self.fault.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn interleave(&self, id: &TemplateId) -> StoreResult<()> {
        let Some(current) = self.inner.read(id).await? else {
            return Ok(());
        };
        let n = self.interleaved.fetch_add(1, Ordering::SeqCst) + 1;
        let edit = ChangeSet::live(
            TemplatePatch::new().description(format!("interleaved edit {n}")),
            self.clock.now(),
        );
        self.inner
            .conditional_write(id, &edit, &current.version)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VersionedStore for ScriptedStore {
    async fn read(&self, id: &TemplateId) -> StoreResult<Option<Template>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Fault::FailReads(err) = self.fault() {
            return Err(err);
        }
        self.inner.read(id).await
    }

    async fn conditional_write(
        &self,
        id: &TemplateId,
        changes: &ChangeSet,
        expected: &Version,
    ) -> StoreResult<CasOutcome> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        match self.fault() {
            Fault::None | Fault::FailReads(_) => {}
            Fault::AlwaysConflict => {
                let current = self
                    .inner
                    .read(id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound { id: id.clone() })?;
                return Ok(CasOutcome::Conflict {
                    current_version: current.version,
                });
            }
            Fault::InterleaveLiveEdits(n) => {
                if self.interleaved.load(Ordering::SeqCst) < n {
                    self.interleave(id).await?;
                }
            }
            Fault::FailWrites(err) => return Err(err),
        }
        self.inner.conditional_write(id, changes, expected).await
    }

    async fn list_ids(&self) -> StoreResult<Vec<TemplateId>> {
        self.inner.list_ids().await
    }
}

/// Wrapper that holds the first `parties` reads until all of them arrive.
///
/// Two writers racing through this store are guaranteed to observe the same
/// version before either writes, which forces exactly one conflict.
pub struct BarrierStore<S> {
    inner: S,
    barrier: Barrier,
    parties: u32,
    reads: AtomicU32,
}

impl<S: VersionedStore> BarrierStore<S> {
    pub fn new(inner: S, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
            parties: parties as u32,
            reads: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: VersionedStore> VersionedStore for BarrierStore<S> {
    async fn read(&self, id: &TemplateId) -> StoreResult<Option<Template>> {
        let result = self.inner.read(id).await;
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.parties {
            self.barrier.wait().await;
        }
        result
    }

    async fn conditional_write(
        &self,
        id: &TemplateId,
        changes: &ChangeSet,
        expected: &Version,
    ) -> StoreResult<CasOutcome> {
        self.inner.conditional_write(id, changes, expected).await
    }

    async fn list_ids(&self) -> StoreResult<Vec<TemplateId>> {
        self.inner.list_ids().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use chrono::Utc;

    fn scripted(fault: Fault) -> ScriptedStore {
        let store = ScriptedStore::new(Arc::new(ManualClock::new()), fault);
        store.insert(Template::new("t1", "Original", Utc::now())).unwrap();
        store
    }

    #[tokio::test]
    async fn test_always_conflict_never_applies() {
        let store = scripted(Fault::AlwaysConflict);
        let id = TemplateId::from("t1");
        let changes = ChangeSet::live(TemplatePatch::new().name("A"), Utc::now());

        let outcome = store
            .conditional_write(&id, &changes, &Version::from("v1"))
            .await
            .unwrap();
        assert!(!outcome.is_committed());
        assert_eq!(store.read(&id).await.unwrap().unwrap().name, "Original");
        assert_eq!(store.write_calls(), 1);
    }

    #[tokio::test]
    async fn test_interleaved_edit_causes_real_conflict() {
        let store = scripted(Fault::InterleaveLiveEdits(1));
        let id = TemplateId::from("t1");
        let changes = ChangeSet::live(TemplatePatch::new().name("A"), Utc::now());

        let first = store
            .conditional_write(&id, &changes, &Version::from("v1"))
            .await
            .unwrap();
        assert_eq!(
            first,
            CasOutcome::Conflict {
                current_version: Version::from("v2")
            }
        );

        let second = store
            .conditional_write(&id, &changes, &Version::from("v2"))
            .await
            .unwrap();
        assert!(second.is_committed());
        assert_eq!(store.interleaved_edits(), 1);
    }

    #[tokio::test]
    async fn test_failing_writes_surface_error() {
        let store = scripted(Fault::FailWrites(StoreError::Unavailable {
            reason: "down".into(),
        }));
        let changes = ChangeSet::live(TemplatePatch::new().name("A"), Utc::now());
        let err = store
            .conditional_write(&TemplateId::from("t1"), &changes, &Version::from("v1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_barrier_store_releases_both_readers() {
        let inner = InMemoryVersionedStore::new();
        inner.insert(Template::new("t1", "Original", Utc::now())).unwrap();
        let store = Arc::new(BarrierStore::new(inner, 2));

        let a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.read(&TemplateId::from("t1")).await })
        };
        let b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.read(&TemplateId::from("t1")).await })
        };

        assert!(a.await.unwrap().unwrap().is_some());
        assert!(b.await.unwrap().unwrap().is_some());
        // Past the barrier, reads pass straight through.
        assert!(store.read(&TemplateId::from("t1")).await.unwrap().is_some());
    }
}
