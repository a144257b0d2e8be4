//! STENCIL Test Utilities
//!
//! Centralized test infrastructure for the STENCIL workspace:
//! - Proptest generators for templates, patches and retry policies
//! - A virtual clock and fault-injecting stores
//! - Test fixtures for common scenarios
//! - Custom assertions for update outcomes

pub mod clock;
pub mod stores;

pub use clock::ManualClock;
pub use stores::{BarrierStore, Fault, ScriptedStore};

// Re-export core types for convenience
pub use stencil_core::{
    ChangeSet, Clock, ErrorKind, FieldDefinition, FieldKind, ProcessOutcome, RetryPolicy,
    Section, SkipReason, StoreError, Template, TemplateId, TemplatePatch, Timestamp,
    UpdateError, UpdateOptions, UpdateSuccess, Version,
};
pub use stencil_storage::{CasOutcome, InMemoryVersionedStore, VersionedStore};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for STENCIL types.

    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    /// Short lowercase identifier.
    pub fn arb_ident() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,7}"
    }

    pub fn arb_template_id() -> impl Strategy<Value = TemplateId> {
        arb_ident().prop_map(TemplateId::new)
    }

    /// Generate a Timestamp within 2020-2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_field_kind() -> impl Strategy<Value = FieldKind> {
        prop_oneof![
            Just(FieldKind::Text),
            Just(FieldKind::Number),
            Just(FieldKind::Date),
            Just(FieldKind::Checkbox),
            prop::collection::vec(arb_ident(), 1..4)
                .prop_map(|options| FieldKind::Select { options }),
        ]
    }

    pub fn arb_field_definition() -> impl Strategy<Value = FieldDefinition> {
        ("[A-Za-z ]{1,16}", arb_field_kind(), any::<bool>()).prop_map(|(label, kind, required)| {
            FieldDefinition {
                label,
                kind,
                required,
            }
        })
    }

    pub fn arb_field_definitions() -> impl Strategy<Value = BTreeMap<String, FieldDefinition>> {
        prop::collection::btree_map(arb_ident(), arb_field_definition(), 0..6)
    }

    pub fn arb_section() -> impl Strategy<Value = Section> {
        (arb_ident(), "[A-Za-z ]{1,16}", prop::collection::vec(arb_ident(), 0..4)).prop_map(
            |(id, title, field_ids)| Section {
                id,
                title,
                field_ids,
            },
        )
    }

    pub fn arb_template() -> impl Strategy<Value = Template> {
        (
            arb_template_id(),
            "[A-Za-z ]{1,24}",
            proptest::option::of("[A-Za-z ]{0,32}"),
            prop::collection::vec(arb_section(), 0..4),
            arb_field_definitions(),
            arb_timestamp(),
        )
            .prop_map(|(id, name, description, sections, field_definitions, now)| {
                let mut template = Template::new(id, name, now);
                template.description = description;
                template.sections = sections;
                template.field_definitions = field_definitions;
                template
            })
    }

    /// Any patch, including the empty one.
    pub fn arb_template_patch() -> impl Strategy<Value = TemplatePatch> {
        (
            proptest::option::of("[A-Za-z ]{1,24}"),
            proptest::option::of(proptest::option::of("[A-Za-z ]{0,32}")),
            proptest::option::of(prop::collection::vec(arb_section(), 0..3)),
            proptest::option::of(arb_field_definitions()),
        )
            .prop_map(|(name, description, sections, field_definitions)| TemplatePatch {
                name,
                description,
                sections,
                field_definitions,
            })
    }

    /// A retry policy that passes validation.
    pub fn arb_retry_policy() -> impl Strategy<Value = RetryPolicy> {
        (1u32..8, 1u64..500, 1.0f64..4.0, any::<bool>(), 1u64..20, 100u64..10_000).prop_map(
            |(max_attempts, base_backoff_ms, backoff_multiplier, jitter, cap_factor, deadline_ms)| {
                RetryPolicy {
                    max_attempts,
                    base_backoff_ms,
                    backoff_multiplier,
                    jitter,
                    deadline_ms,
                    max_backoff_ms: base_backoff_ms * cap_factor,
                }
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    /// Two sections over three fields, one of which is required.
    pub fn intake_template(id: &str, now: Timestamp) -> Template {
        let mut template = Template::new(id, "Patient intake", now);
        template.sections = vec![
            Section::new("personal", "Personal").with_fields(["full_name", "dob"]),
            Section::new("consent", "Consent").with_fields(["agree"]),
        ];
        template.field_definitions = intake_fields();
        template
    }

    pub fn intake_fields() -> BTreeMap<String, FieldDefinition> {
        BTreeMap::from([
            (
                "full_name".to_string(),
                FieldDefinition::new("Full name", FieldKind::Text).required(),
            ),
            ("dob".to_string(), FieldDefinition::new("Date of birth", FieldKind::Date)),
            ("agree".to_string(), FieldDefinition::new("I agree", FieldKind::Checkbox)),
            ("notes".to_string(), FieldDefinition::new("Notes", FieldKind::Text)),
        ])
    }

    /// Store on `clock` holding `t1` at `v1`, last live edit at the clock's now.
    pub fn seeded_store(clock: Arc<dyn Clock>) -> InMemoryVersionedStore {
        let now = clock.now();
        let store = InMemoryVersionedStore::with_clock(clock);
        let _ = store.insert(intake_template("t1", now));
        store
    }

    /// Scripted store on `clock` holding `t1` at `v1`.
    pub fn seeded_scripted_store(clock: Arc<dyn Clock>, fault: Fault) -> ScriptedStore {
        let now = clock.now();
        let store = ScriptedStore::new(clock, fault);
        let _ = store.insert(intake_template("t1", now));
        store
    }

    /// Template whose last live edit happened `age` before `now`.
    pub fn template_edited_ago(id: &str, now: Timestamp, age: Duration) -> Template {
        let edited_at = now - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
        intake_template(id, edited_at)
    }

    /// Fast policy for tests: 3 attempts, 10ms base, doubling, no jitter.
    pub fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff_ms: 10,
            backoff_multiplier: 2.0,
            jitter: false,
            deadline_ms: 1_000,
            max_backoff_ms: 1_000,
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over update and background outcomes.

    use super::*;

    #[track_caller]
    pub fn assert_committed(result: &Result<UpdateSuccess, UpdateError>) -> &UpdateSuccess {
        match result {
            Ok(success) => success,
            Err(err) => panic!("Expected commit, got: {err:?}"),
        }
    }

    /// Assert that an update failed with the given error kind.
    #[track_caller]
    pub fn assert_update_kind(result: &Result<UpdateSuccess, UpdateError>, kind: ErrorKind) {
        match result {
            Err(err) => assert_eq!(err.kind(), kind, "Wrong error kind: {err:?}"),
            Ok(success) => panic!("Expected {kind:?}, got success at {}", success.new_version),
        }
    }

    #[track_caller]
    pub fn assert_processed(outcome: &ProcessOutcome) {
        assert!(outcome.is_processed(), "Expected processed, got: {outcome:?}");
    }

    #[track_caller]
    pub fn assert_skipped_recent(outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Skipped(SkipReason::RecentUserUpdate { .. }) => {}
            other => panic!("Expected skip for recent user update, got: {other:?}"),
        }
    }

    #[track_caller]
    pub fn assert_skipped_conflict(outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Skipped(SkipReason::Conflict { .. }) => {}
            other => panic!("Expected skip for conflict, got: {other:?}"),
        }
    }
}
