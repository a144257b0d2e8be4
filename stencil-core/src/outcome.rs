//! Tagged outcomes of the public operations.

use crate::{DurationMs, ErrorKind, Template, UpdateError, Version};
use serde::{Deserialize, Serialize};

/// A committed update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateSuccess {
    pub data: Template,
    pub new_version: Version,
    /// Conditional-write attempts used, including the successful one.
    pub attempts: u32,
}

/// Diagnostic payload for a failed update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_version: Option<Version>,
}

impl From<&UpdateError> for ErrorReport {
    fn from(err: &UpdateError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            attempts: err.attempts(),
            last_version: err.last_version().cloned(),
        }
    }
}

/// Wire shape of `updateTemplate`:
/// `{success: true, data, newVersion}` or `{success: false, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Template>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_version: Option<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl From<Result<UpdateSuccess, UpdateError>> for UpdateResponse {
    fn from(result: Result<UpdateSuccess, UpdateError>) -> Self {
        match result {
            Ok(ok) => Self {
                success: true,
                data: Some(ok.data),
                new_version: Some(ok.new_version),
                attempts: Some(ok.attempts),
                error: None,
            },
            Err(err) => Self {
                success: false,
                data: None,
                new_version: None,
                attempts: None,
                error: Some(ErrorReport::from(&err)),
            },
        }
    }
}

/// Why the background writer left a record alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A live edit landed inside the cooldown window.
    RecentUserUpdate { age_ms: DurationMs, cooldown_ms: DurationMs },
    /// The retry budget ran out while competing with other writers.
    Conflict { attempts: u32, timed_out: bool },
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecentUserUpdate { .. } => "recent user update",
            Self::Conflict { .. } => "conflict",
        }
    }
}

/// Result of one background recomputation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Processed { version: Version },
    Skipped(SkipReason),
    Failed(UpdateError),
}

impl ProcessOutcome {
    /// `"processed"`, `"skipped"` or `"failed"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed { .. } => "processed",
            Self::Skipped(_) => "skipped",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_processed(&self) -> bool {
        matches!(self, Self::Processed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// Tally of one background sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub processed: u64,
    pub skipped_recent: u64,
    pub skipped_conflict: u64,
    pub failed: u64,
}

impl SweepReport {
    pub fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Processed { .. } => self.processed += 1,
            ProcessOutcome::Skipped(SkipReason::RecentUserUpdate { .. }) => {
                self.skipped_recent += 1
            }
            ProcessOutcome::Skipped(SkipReason::Conflict { .. }) => self.skipped_conflict += 1,
            ProcessOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.processed + self.skipped_recent + self.skipped_conflict + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TemplateId;
    use chrono::Utc;

    #[test]
    fn test_success_response_shape() {
        let template = Template::new("t1", "A", Utc::now());
        let response = UpdateResponse::from(Ok(UpdateSuccess {
            data: template,
            new_version: Version::from("v2"),
            attempts: 1,
        }));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["newVersion"], "v2");
        assert_eq!(json["data"]["name"], "A");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failure_response_shape() {
        let response = UpdateResponse::from(Err(UpdateError::Exhausted {
            attempts: 3,
            last_version: Version::from("v9"),
        }));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "EXHAUSTED");
        assert_eq!(json["error"]["attempts"], 3);
        assert_eq!(json["error"]["lastVersion"], "v9");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_not_found_report_has_no_version() {
        let report = ErrorReport::from(&UpdateError::NotFound {
            id: TemplateId::from("missing"),
            attempts: 0,
            last_version: None,
        });
        assert_eq!(report.kind, ErrorKind::NotFound);
        assert_eq!(report.attempts, 0);
        assert!(report.last_version.is_none());
    }

    #[test]
    fn test_process_outcome_strings() {
        let processed = ProcessOutcome::Processed {
            version: Version::from("v4"),
        };
        let skipped = ProcessOutcome::Skipped(SkipReason::RecentUserUpdate {
            age_ms: 10,
            cooldown_ms: 5000,
        });
        let failed = ProcessOutcome::Failed(UpdateError::NotFound {
            id: TemplateId::from("t1"),
            attempts: 0,
            last_version: None,
        });
        assert_eq!(processed.as_str(), "processed");
        assert_eq!(skipped.as_str(), "skipped");
        assert_eq!(failed.as_str(), "failed");
    }

    #[test]
    fn test_sweep_report_tally() {
        let mut report = SweepReport::default();
        report.record(&ProcessOutcome::Processed {
            version: Version::from("v2"),
        });
        report.record(&ProcessOutcome::Skipped(SkipReason::Conflict {
            attempts: 2,
            timed_out: false,
        }));
        report.record(&ProcessOutcome::Skipped(SkipReason::RecentUserUpdate {
            age_ms: 1,
            cooldown_ms: 5000,
        }));
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped_conflict, 1);
        assert_eq!(report.skipped_recent, 1);
        assert_eq!(report.total(), 3);
    }
}
