//! Property-Based Tests for Background Deference
//!
//! **Property 5: Cooldown Deference**
//!
//! For any template whose last live edit is younger than the cooldown,
//! `process_record` reports `"skipped"` and issues no write.
//!
//! **Property 7: Background After a Fresh Edit**
//!
//! Immediately after a live edit the background writer skips; once the
//! cooldown has passed it processes the record, updating derived fields and
//! the version while leaving user fields and `last_user_update` alone.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use stencil_core::{Clock, ProcessOutcome, SkipReason, TemplatePatch, Version};
use stencil_sync::background_sweep_task;
use stencil_test_utils::assertions::{
    assert_processed, assert_skipped_conflict, assert_skipped_recent,
};
use stencil_test_utils::fixtures::template_edited_ago;
use stencil_test_utils::Fault;
use tokio::sync::watch;

#[path = "support/harness.rs"]
mod harness;
use harness::{scripted_service, t1, test_config};

#[tokio::test]
async fn test_skip_then_process_after_live_edit() {
    let h = scripted_service(Fault::None, test_config());
    let cooldown_ms = h.service.config().background.cooldown_ms;

    let edited = h
        .service
        .update_template(&t1(), TemplatePatch::new().name("Edited"), None)
        .await
        .unwrap();
    let writes_after_edit = h.store.write_calls();

    let immediate = h.service.process_record(&t1()).await;
    assert_eq!(immediate.as_str(), "skipped");
    assert_skipped_recent(&immediate);
    assert_eq!(h.store.write_calls(), writes_after_edit);

    h.clock.advance_ms(cooldown_ms);
    let later = h.service.process_record(&t1()).await;
    assert_eq!(later.as_str(), "processed");
    assert_processed(&later);

    let current = h.service.get_template(&t1()).await.unwrap().unwrap();
    assert_eq!(current.name, "Edited");
    assert_eq!(current.sections, edited.data.sections);
    assert_eq!(current.field_definitions, edited.data.field_definitions);
    assert_eq!(current.last_user_update, edited.data.last_user_update);
    assert_eq!(current.version, Version::from("v3"));

    let derived = current.derived.expect("derived fields written");
    assert_eq!(derived.section_count, 2);
    assert_eq!(derived.field_count, 4);
    assert_eq!(derived.computed_at, h.clock.now());
}

#[tokio::test]
async fn test_skip_reports_age_and_cooldown() {
    let h = scripted_service(Fault::None, test_config());
    h.clock.advance_ms(1_200);

    let outcome = h.service.process_record(&t1()).await;

    assert_eq!(
        outcome,
        ProcessOutcome::Skipped(SkipReason::RecentUserUpdate {
            age_ms: 1_200,
            cooldown_ms: 5_000,
        })
    );
}

#[tokio::test]
async fn test_background_never_forces_past_conflicts() {
    let h = scripted_service(Fault::AlwaysConflict, test_config());
    h.clock.advance_ms(60_000);

    let outcome = h.service.process_record(&t1()).await;

    assert_skipped_conflict(&outcome);
    let current = h.service.get_template(&t1()).await.unwrap().unwrap();
    assert_eq!(current.version, Version::from("v1"));
    assert!(current.derived.is_none());
}

#[tokio::test]
async fn test_sweep_mixes_outcomes() {
    let h = scripted_service(Fault::None, test_config());
    h.clock.advance_ms(60_000);
    h.store
        .insert(template_edited_ago("fresh", h.clock.now(), Duration::from_millis(10)))
        .unwrap();
    h.store
        .insert(template_edited_ago("stale", h.clock.now(), Duration::from_secs(600)))
        .unwrap();

    let report = h.service.process_all().await.unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped_recent, 1);
    assert_eq!(report.skipped_conflict, 0);
    assert_eq!(report.failed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_task_reports_metrics_on_shutdown() {
    let h = scripted_service(Fault::None, test_config());
    h.clock.advance_ms(60_000);
    let config = h.service.config().background.clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(background_sweep_task(
        h.service.processor(),
        config,
        shutdown_rx,
    ));

    // Only the immediate first tick fits before shutdown.
    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown_tx.send(true).unwrap();
    let metrics: Arc<_> = task.await.unwrap();
    let snapshot = metrics.snapshot();

    assert_eq!(snapshot.sweeps, 1);
    assert_eq!(snapshot.processed, 1);
    assert_eq!(snapshot.failed, 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// For any age inside the cooldown, no write happens; for any age at or
    /// beyond it, the record is processed.
    #[test]
    fn prop_cooldown_boundary(age_ms in 0u64..10_000) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let h = scripted_service(Fault::None, test_config());
            let cooldown_ms = h.service.config().background.cooldown_ms;
            h.clock.advance_ms(age_ms);

            let outcome = h.service.process_record(&t1()).await;

            if age_ms < cooldown_ms {
                prop_assert_eq!(outcome.as_str(), "skipped");
                prop_assert_eq!(h.store.write_calls(), 0);
            } else {
                prop_assert_eq!(outcome.as_str(), "processed");
                prop_assert_eq!(h.store.write_calls(), 1);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
