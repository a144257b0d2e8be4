//! Optimistic write loop shared by every writer.
//!
//! ```text
//! READ_VERSION ──read──▶ ATTEMPT_WRITE ──committed──▶ SUCCESS
//!      ▲                     │
//!      │                  conflict ──attempts spent──▶ EXHAUSTED
//!      │                     │      ──past deadline──▶ TIMEOUT
//!      └──── BACKOFF ◀───────┘
//!      (deadline re-checked after the wait)
//! ```
//!
//! Only a version conflict re-enters the loop. A store error ends it at once
//! (FATAL), and a record that disappears ends it as NOT_FOUND. The caller
//! decides what to write after every re-read through [`Step`], which is how
//! the background writer re-checks its cooldown.

use std::sync::Arc;

use stencil_core::{
    elapsed_ms, ChangeSet, Clock, RetryPolicy, StoreError, Template, TemplateId, UpdateError,
    Version,
};
use stencil_storage::{CasOutcome, VersionedStore};

use crate::backoff::BackoffSchedule;

/// What the writer wants to do with the record it just read.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<D> {
    /// Attempt this change against the version just read.
    Write(ChangeSet),
    /// Leave the record alone.
    Decline(D),
}

/// How a retry loop ended.
///
/// Every failure is already the caller-facing [`UpdateError`], carrying the
/// attempt count and the last version observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal<D> {
    Success { record: Template, attempts: u32 },
    Declined { reason: D, attempts: u32 },
    Failed(UpdateError),
}

impl<D> Terminal<D> {
    /// Conditional writes issued before the loop ended.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Declined { attempts, .. } => *attempts,
            Self::Failed(err) => err.attempts(),
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Declined { .. } => "declined",
            Self::Failed(UpdateError::Exhausted { .. }) => "exhausted",
            Self::Failed(UpdateError::Timeout { .. }) => "timeout",
            Self::Failed(UpdateError::NotFound { .. }) => "not_found",
            Self::Failed(_) => "fatal",
        }
    }
}

enum State {
    ReadVersion,
    AttemptWrite { expected: Version, changes: ChangeSet },
    Backoff,
}

/// Runs one logical write against a [`VersionedStore`].
pub struct RetryLoop<'a, S: VersionedStore + ?Sized> {
    store: &'a S,
    clock: &'a Arc<dyn Clock>,
    policy: &'a RetryPolicy,
}

impl<'a, S: VersionedStore + ?Sized> RetryLoop<'a, S> {
    pub fn new(store: &'a S, clock: &'a Arc<dyn Clock>, policy: &'a RetryPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Drive the state machine until it reaches a terminal state.
    ///
    /// `prepare` is called with every freshly read record.
    pub async fn run<D, F>(&self, id: &TemplateId, mut prepare: F) -> Terminal<D>
    where
        F: FnMut(&Template) -> Step<D>,
    {
        let started = self.clock.now();
        let deadline_ms = self.policy.deadline_ms;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut schedule = BackoffSchedule::new(self.policy);

        // Conditional writes issued so far.
        let mut attempts: u32 = 0;
        let mut last_version: Option<Version> = None;
        let mut state = State::ReadVersion;

        loop {
            state = match state {
                State::ReadVersion => match self.store.read(id).await {
                    Err(source) => {
                        return Terminal::Failed(UpdateError::Store {
                            source,
                            attempts,
                            last_version,
                        })
                    }
                    Ok(None) => return not_found(id, attempts, last_version),
                    Ok(Some(record)) => {
                        last_version = Some(record.version.clone());
                        match prepare(&record) {
                            Step::Decline(reason) => {
                                return Terminal::Declined { reason, attempts }
                            }
                            Step::Write(changes) => State::AttemptWrite {
                                expected: record.version,
                                changes,
                            },
                        }
                    }
                },

                State::AttemptWrite { expected, changes } => {
                    attempts += 1;
                    tracing::debug!(
                        template_id = %id,
                        attempt = attempts,
                        version = %expected,
                        "Attempting conditional write"
                    );

                    match self.store.conditional_write(id, &changes, &expected).await {
                        Ok(CasOutcome::Committed(record)) => {
                            return Terminal::Success { record, attempts }
                        }
                        Ok(CasOutcome::Conflict { current_version }) => {
                            tracing::debug!(
                                template_id = %id,
                                attempt = attempts,
                                expected = %expected,
                                current = %current_version,
                                "Version conflict"
                            );
                            last_version = Some(current_version.clone());

                            if attempts >= max_attempts {
                                return Terminal::Failed(UpdateError::Exhausted {
                                    attempts,
                                    last_version: current_version,
                                });
                            }
                            let elapsed = elapsed_ms(started, self.clock.now());
                            if elapsed >= deadline_ms {
                                return Terminal::Failed(UpdateError::Timeout {
                                    attempts,
                                    elapsed_ms: elapsed,
                                    deadline_ms,
                                    last_version,
                                });
                            }
                            State::Backoff
                        }
                        Err(StoreError::NotFound { .. }) => {
                            return not_found(id, attempts, Some(expected))
                        }
                        Err(source) => {
                            return Terminal::Failed(UpdateError::Store {
                                source,
                                attempts,
                                last_version,
                            })
                        }
                    }
                }

                State::Backoff => {
                    let delay = schedule.next_delay(attempts);
                    tracing::debug!(
                        template_id = %id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Backing off before retry"
                    );
                    self.clock.sleep(delay).await;

                    let elapsed = elapsed_ms(started, self.clock.now());
                    if elapsed >= deadline_ms {
                        return Terminal::Failed(UpdateError::Timeout {
                            attempts,
                            elapsed_ms: elapsed,
                            deadline_ms,
                            last_version,
                        });
                    }
                    State::ReadVersion
                }
            };
        }
    }
}

fn not_found<D>(id: &TemplateId, attempts: u32, last_version: Option<Version>) -> Terminal<D> {
    Terminal::Failed(UpdateError::NotFound {
        id: id.clone(),
        attempts,
        last_version,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::time::Duration;
    use stencil_core::TemplatePatch;
    use stencil_test_utils::fixtures::{fast_retry, seeded_scripted_store};
    use stencil_test_utils::{Fault, ManualClock};

    fn live_name(clock: &Arc<dyn Clock>) -> impl FnMut(&Template) -> Step<Infallible> + '_ {
        move |_| Step::Write(ChangeSet::live(TemplatePatch::new().name("A"), clock.now()))
    }

    #[tokio::test]
    async fn test_first_try_success() {
        let manual = Arc::new(ManualClock::new());
        let clock: Arc<dyn Clock> = manual.clone();
        let store = seeded_scripted_store(clock.clone(), Fault::None);
        let policy = fast_retry();

        let terminal = RetryLoop::new(&store, &clock, &policy)
            .run(&TemplateId::from("t1"), live_name(&clock))
            .await;

        let (record, attempts) = match terminal {
            Terminal::Success { record, attempts } => (record, attempts),
            other => panic!("expected success, got {}", other.state_name()),
        };
        assert_eq!(attempts, 1);
        assert_eq!(record.version, Version::from("v2"));
        assert!(manual.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_then_success_rereads() {
        let manual = Arc::new(ManualClock::new());
        let clock: Arc<dyn Clock> = manual.clone();
        let store = seeded_scripted_store(clock.clone(), Fault::InterleaveLiveEdits(1));
        let policy = fast_retry();

        let terminal = RetryLoop::new(&store, &clock, &policy)
            .run(&TemplateId::from("t1"), live_name(&clock))
            .await;

        assert!(matches!(terminal, Terminal::Success { attempts: 2, .. }));
        assert_eq!(store.read_calls(), 2);
        assert_eq!(manual.sleeps(), vec![Duration::from_millis(10)]);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_version() {
        let manual = Arc::new(ManualClock::new());
        let clock: Arc<dyn Clock> = manual.clone();
        let store = seeded_scripted_store(clock.clone(), Fault::AlwaysConflict);
        let policy = fast_retry();

        let terminal = RetryLoop::new(&store, &clock, &policy)
            .run(&TemplateId::from("t1"), live_name(&clock))
            .await;

        assert_eq!(
            terminal,
            Terminal::Failed(UpdateError::Exhausted {
                attempts: 3,
                last_version: Version::from("v1"),
            })
        );
        assert_eq!(store.write_calls(), 3);
        // No wait after the final attempt.
        assert_eq!(manual.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_deadline_checked_after_backoff() {
        let manual = Arc::new(ManualClock::new());
        let clock: Arc<dyn Clock> = manual.clone();
        let store = seeded_scripted_store(clock.clone(), Fault::AlwaysConflict);
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff_ms: 100,
            backoff_multiplier: 2.0,
            jitter: false,
            deadline_ms: 250,
            max_backoff_ms: 10_000,
        };

        let terminal = RetryLoop::new(&store, &clock, &policy)
            .run(&TemplateId::from("t1"), live_name(&clock))
            .await;

        // Sleeps of 100 and 200 put us at 300ms, past the 250ms budget.
        let (attempts, elapsed_ms, deadline_ms) = match terminal {
            Terminal::Failed(UpdateError::Timeout {
                attempts,
                elapsed_ms,
                deadline_ms,
                ..
            }) => (attempts, elapsed_ms, deadline_ms),
            other => panic!("expected timeout, got {}", other.state_name()),
        };
        assert_eq!(attempts, 2);
        assert_eq!(elapsed_ms, 300);
        assert_eq!(deadline_ms, 250);
    }

    #[tokio::test]
    async fn test_store_error_is_not_retried() {
        let manual = Arc::new(ManualClock::new());
        let clock: Arc<dyn Clock> = manual.clone();
        let store = seeded_scripted_store(
            clock.clone(),
            Fault::FailWrites(StoreError::Unavailable {
                reason: "maintenance".into(),
            }),
        );
        let policy = fast_retry();

        let terminal = RetryLoop::new(&store, &clock, &policy)
            .run(&TemplateId::from("t1"), live_name(&clock))
            .await;

        assert!(matches!(
            terminal,
            Terminal::Failed(UpdateError::Store { attempts: 1, .. })
        ));
        assert_eq!(store.write_calls(), 1);
        assert!(manual.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let store = seeded_scripted_store(clock.clone(), Fault::None);
        let policy = fast_retry();

        let terminal = RetryLoop::new(&store, &clock, &policy)
            .run(&TemplateId::from("ghost"), live_name(&clock))
            .await;

        assert_eq!(terminal.state_name(), "not_found");
        assert_eq!(terminal.attempts(), 0);
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_record_vanishing_mid_write_keeps_attempts() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let store = seeded_scripted_store(
            clock.clone(),
            Fault::FailWrites(StoreError::NotFound {
                id: TemplateId::from("t1"),
            }),
        );
        let policy = fast_retry();

        let terminal = RetryLoop::new(&store, &clock, &policy)
            .run(&TemplateId::from("t1"), live_name(&clock))
            .await;

        assert_eq!(
            terminal,
            Terminal::Failed(UpdateError::NotFound {
                id: TemplateId::from("t1"),
                attempts: 1,
                last_version: Some(Version::from("v1")),
            })
        );
    }

    #[tokio::test]
    async fn test_decline_stops_without_writing() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let store = seeded_scripted_store(clock.clone(), Fault::None);
        let policy = fast_retry();

        let terminal = RetryLoop::new(&store, &clock, &policy)
            .run(&TemplateId::from("t1"), |_| Step::<&str>::Decline("busy"))
            .await;

        assert_eq!(
            terminal,
            Terminal::Declined {
                reason: "busy",
                attempts: 0
            }
        );
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_read_failure_is_fatal_before_any_write() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let store = seeded_scripted_store(
            clock.clone(),
            Fault::FailReads(StoreError::LockPoisoned),
        );
        let policy = fast_retry();

        let terminal = RetryLoop::new(&store, &clock, &policy)
            .run(&TemplateId::from("t1"), live_name(&clock))
            .await;

        assert_eq!(terminal.attempts(), 0);
        assert_eq!(terminal.state_name(), "fatal");
    }
}
