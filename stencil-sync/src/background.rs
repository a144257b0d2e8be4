//! Background Derived-Field Recomputation
//!
//! The background writer refreshes each template's derived fields. It is an
//! ordinary optimistic writer with two extra rules:
//!
//! - It defers to people. A template whose last live edit is younger than
//!   the cooldown is skipped without any write, and the check is repeated on
//!   every re-read inside the retry loop.
//! - It never forces. Running out of attempts or time is reported as a skip,
//!   not an error, and the version check is never bypassed.
//!
//! Background writes touch only `derived`, `version` and `updated_at`.
//!
//! # Scheduling
//!
//! [`background_sweep_task`] runs [`BackgroundProcessor::process_all`] on an
//! interval until a shutdown signal arrives:
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(background_sweep_task(processor, config, shutdown_rx));
//!
//! // Later, trigger shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use stencil_core::{
    elapsed_ms, new_operation_id, BackgroundConfig, ChangeSet, Clock, ProcessOutcome, SkipReason,
    StoreError, SweepReport, TemplateId, UpdateError,
};
use stencil_storage::{CacheBackend, ReadThroughCache, VersionedStore};

use crate::retry::{RetryLoop, Step, Terminal};

// ============================================================================
// PROCESSOR
// ============================================================================

/// Recomputes derived fields while deferring to recent live edits.
pub struct BackgroundProcessor<S: VersionedStore + ?Sized, C: CacheBackend> {
    store: Arc<S>,
    cache: ReadThroughCache<C>,
    clock: Arc<dyn Clock>,
    config: BackgroundConfig,
}

impl<S: VersionedStore + ?Sized, C: CacheBackend> BackgroundProcessor<S, C> {
    pub fn new(
        store: Arc<S>,
        cache: ReadThroughCache<C>,
        clock: Arc<dyn Clock>,
        config: BackgroundConfig,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &BackgroundConfig {
        &self.config
    }

    /// Recompute and store the derived fields of one template.
    #[tracing::instrument(
        name = "process_record",
        skip(self),
        fields(template_id = %id, op_id = %new_operation_id())
    )]
    pub async fn process_record(&self, id: &TemplateId) -> ProcessOutcome {
        let clock = &self.clock;
        let cooldown_ms = self.config.cooldown_ms;

        let terminal = RetryLoop::new(&*self.store, clock, &self.config.retry)
            .run(id, |record| {
                let now = clock.now();
                let age_ms = elapsed_ms(record.last_user_update, now);
                if age_ms < cooldown_ms {
                    Step::Decline(SkipReason::RecentUserUpdate {
                        age_ms,
                        cooldown_ms,
                    })
                } else {
                    Step::Write(ChangeSet::background(record.compute_derived(now)))
                }
            })
            .await;

        match terminal {
            Terminal::Success { record, attempts } => {
                self.cache.invalidate(id);
                tracing::info!(
                    version = %record.version,
                    attempts,
                    "Derived fields refreshed"
                );
                ProcessOutcome::Processed {
                    version: record.version,
                }
            }
            Terminal::Declined { reason, attempts } => {
                tracing::debug!(reason = reason.as_str(), attempts, "Deferring to live edit");
                ProcessOutcome::Skipped(reason)
            }
            Terminal::Failed(UpdateError::Exhausted { attempts, .. }) => {
                tracing::debug!(attempts, "Conflict budget spent, skipping");
                ProcessOutcome::Skipped(SkipReason::Conflict {
                    attempts,
                    timed_out: false,
                })
            }
            Terminal::Failed(UpdateError::Timeout { attempts, .. }) => {
                tracing::debug!(attempts, "Deadline reached, skipping");
                ProcessOutcome::Skipped(SkipReason::Conflict {
                    attempts,
                    timed_out: true,
                })
            }
            Terminal::Failed(err) => {
                tracing::error!(error = %err, "Background recomputation failed");
                ProcessOutcome::Failed(err)
            }
        }
    }

    /// Process every stored template once, in id order.
    pub async fn process_all(&self) -> Result<SweepReport, StoreError> {
        let mut ids = self.store.list_ids().await?;
        ids.sort();

        let mut report = SweepReport::default();
        for id in &ids {
            let outcome = self.process_record(id).await;
            report.record(&outcome);
        }
        Ok(report)
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Metrics for background sweeps.
#[derive(Debug, Default)]
pub struct BackgroundMetrics {
    /// Total sweeps completed
    pub sweeps: AtomicU64,
    pub processed: AtomicU64,
    pub skipped_recent: AtomicU64,
    pub skipped_conflict: AtomicU64,
    pub failed: AtomicU64,
    /// Sweeps that could not list templates
    pub sweep_errors: AtomicU64,
}

impl BackgroundMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, report: &SweepReport) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(report.processed, Ordering::Relaxed);
        self.skipped_recent
            .fetch_add(report.skipped_recent, Ordering::Relaxed);
        self.skipped_conflict
            .fetch_add(report.skipped_conflict, Ordering::Relaxed);
        self.failed.fetch_add(report.failed, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> BackgroundMetricsSnapshot {
        BackgroundMetricsSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            skipped_recent: self.skipped_recent.load(Ordering::Relaxed),
            skipped_conflict: self.skipped_conflict.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweep metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundMetricsSnapshot {
    pub sweeps: u64,
    pub processed: u64,
    pub skipped_recent: u64,
    pub skipped_conflict: u64,
    pub failed: u64,
    pub sweep_errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Periodically sweep every template until `shutdown_rx` turns `true`.
///
/// The first sweep runs immediately. Missed ticks are skipped rather than
/// bunched up.
pub async fn background_sweep_task<S, C>(
    processor: Arc<BackgroundProcessor<S, C>>,
    config: BackgroundConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<BackgroundMetrics>
where
    S: VersionedStore + ?Sized,
    C: CacheBackend,
{
    let metrics = Arc::new(BackgroundMetrics::new());

    let mut sweep_interval = interval(config.sweep_interval());
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        sweep_interval_ms = config.sweep_interval_ms,
        cooldown_ms = processor.config().cooldown_ms,
        "Background sweep task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Background sweep task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                match processor.process_all().await {
                    Ok(report) => {
                        metrics.add(&report);
                        if report.processed > 0 || report.failed > 0 {
                            tracing::info!(
                                processed = report.processed,
                                skipped_recent = report.skipped_recent,
                                skipped_conflict = report.skipped_conflict,
                                failed = report.failed,
                                "Background sweep completed"
                            );
                        } else {
                            tracing::trace!(total = report.total(), "Background sweep completed with no writes");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to list templates for sweep");
                        metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweeps = snapshot.sweeps,
        processed = snapshot.processed,
        skipped_recent = snapshot.skipped_recent,
        skipped_conflict = snapshot.skipped_conflict,
        failed = snapshot.failed,
        sweep_errors = snapshot.sweep_errors,
        "Background sweep task completed"
    );

    metrics
}

// ============================================================================
// TESTS
// ============================================================================
