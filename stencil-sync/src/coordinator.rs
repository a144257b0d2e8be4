//! Live (interactive) template updates.
//!
//! One call to [`UpdateCoordinator::update_template`] is one logical write:
//! read the current version, attempt a conditional write, and on conflict
//! back off and start over from a fresh read. A commit invalidates the cache
//! entry before the call returns.

use std::convert::Infallible;
use std::sync::Arc;

use stencil_core::{
    new_operation_id, ChangeSet, Clock, RetryPolicy, TemplateId, TemplatePatch, UpdateError,
    UpdateOptions, UpdateSuccess, ValidationError,
};
use stencil_storage::{CacheBackend, ReadThroughCache, VersionedStore};

use crate::retry::{RetryLoop, Step, Terminal};

/// Coordinates conflict-safe updates from live callers.
pub struct UpdateCoordinator<S: VersionedStore + ?Sized, C: CacheBackend> {
    store: Arc<S>,
    cache: ReadThroughCache<C>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl<S: VersionedStore + ?Sized, C: CacheBackend> UpdateCoordinator<S, C> {
    pub fn new(
        store: Arc<S>,
        cache: ReadThroughCache<C>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            policy,
        }
    }

    /// Default retry policy applied when a call passes no overrides.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Apply `patch` to template `id`, retrying on version conflicts.
    ///
    /// Fields absent from `patch` are preserved from whatever version is
    /// current at commit time. On success `last_user_update` is set to the
    /// clock's now and the cache entry for `id` is gone.
    ///
    /// # Errors
    ///
    /// - `Validation` for an empty patch or invalid `options`
    /// - `NotFound` if the template does not exist
    /// - `Exhausted` once `maxAttempts` conditional writes all conflicted
    /// - `Timeout` once `deadlineMs` has elapsed
    /// - `Store` on any store failure, without retrying
    #[tracing::instrument(
        name = "update_template",
        skip(self, patch, options),
        fields(template_id = %id, op_id = %new_operation_id())
    )]
    pub async fn update_template(
        &self,
        id: &TemplateId,
        patch: TemplatePatch,
        options: Option<&UpdateOptions>,
    ) -> Result<UpdateSuccess, UpdateError> {
        if patch.is_empty() {
            return Err(ValidationError::EmptyPatch.into());
        }

        let policy = match options {
            Some(options) => options.resolve(&self.policy),
            None => self.policy.clone(),
        };
        policy.validate().map_err(ValidationError::from)?;

        tracing::debug!(
            changed = ?patch.changed_fields(),
            max_attempts = policy.max_attempts,
            deadline_ms = policy.deadline_ms,
            "Starting template update"
        );

        let clock = &self.clock;
        let terminal = RetryLoop::new(&*self.store, clock, &policy)
            .run(id, |_| {
                Step::<Infallible>::Write(ChangeSet::live(patch.clone(), clock.now()))
            })
            .await;

        match terminal {
            Terminal::Success { record, attempts } => {
                self.cache.invalidate(id);
                tracing::info!(
                    version = %record.version,
                    attempts,
                    "Template updated"
                );
                Ok(UpdateSuccess {
                    new_version: record.version.clone(),
                    data: record,
                    attempts,
                })
            }
            Terminal::Declined { reason, .. } => match reason {},
            Terminal::Failed(err) => {
                log_failure(&err);
                Err(err)
            }
        }
    }
}

fn log_failure(err: &UpdateError) {
    match err {
        UpdateError::Exhausted { .. } | UpdateError::Timeout { .. } => tracing::warn!(
            error = %err,
            kind = ?err.kind(),
            attempts = err.attempts(),
            "Template update gave up"
        ),
        UpdateError::NotFound { .. } => tracing::debug!(error = %err, "Template update target missing"),
        UpdateError::Store { .. } => tracing::error!(
            error = %err,
            attempts = err.attempts(),
            "Template update failed on store error"
        ),
        UpdateError::Validation(_) => tracing::debug!(error = %err, "Template update rejected"),
    }
}

// ============================================================================
// TESTS
// ============================================================================
