//! Jobs as reported by the Gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Job execution status.
///
/// Progression is monotonic: `pending -> processing -> completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    /// Whether an observed change from `self` to `next` respects the lifecycle.
    ///
    /// Staying in the same status is allowed (two polls may see the same job
    /// unchanged); skipping `processing` is allowed because polls are sparse.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn check_transition(&self, next: JobStatus) -> DomainResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self.as_str(), next.as_str()))
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!(
                "status must be one of: pending, processing, completed, failed (got `{other}`)"
            ))),
        }
    }
}

/// Kind of work a job performs (`type` on the wire).
///
/// Tags the worker does not know are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobKind {
    DataProcessing,
    HealthReport,
    Cleanup,
    AnalyticsAggregation,
    DataAggregation,
    BatchImport,
    Other(String),
}

impl JobKind {
    /// Kinds offered by the job creation form, in display order.
    pub const SELECTABLE: [JobKind; 4] = [
        JobKind::DataProcessing,
        JobKind::HealthReport,
        JobKind::Cleanup,
        JobKind::AnalyticsAggregation,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            JobKind::DataProcessing => "data-processing",
            JobKind::HealthReport => "health-report",
            JobKind::Cleanup => "cleanup",
            JobKind::AnalyticsAggregation => "analytics-aggregation",
            JobKind::DataAggregation => "data-aggregation",
            JobKind::BatchImport => "batch-import",
            JobKind::Other(tag) => tag,
        }
    }

    /// Human label used by renderers.
    pub fn label(&self) -> &str {
        match self {
            JobKind::DataProcessing => "Data Processing",
            JobKind::HealthReport => "Health Report",
            JobKind::Cleanup => "Cleanup",
            JobKind::AnalyticsAggregation => "Analytics Aggregation",
            JobKind::DataAggregation => "Data Aggregation",
            JobKind::BatchImport => "Batch Import",
            JobKind::Other(tag) => tag,
        }
    }
}

impl Default for JobKind {
    fn default() -> Self {
        Self::DataProcessing
    }
}

impl From<String> for JobKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "data-processing" => JobKind::DataProcessing,
            "health-report" => JobKind::HealthReport,
            "cleanup" => JobKind::Cleanup,
            "analytics-aggregation" => JobKind::AnalyticsAggregation,
            "data-aggregation" => JobKind::DataAggregation,
            "batch-import" => JobKind::BatchImport,
            _ => JobKind::Other(value),
        }
    }
}

impl From<&str> for JobKind {
    fn from(value: &str) -> Self {
        JobKind::from(value.to_string())
    }
}

impl From<JobKind> for String {
    fn from(value: JobKind) -> Self {
        match value {
            JobKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub processed_at: DateTime<Utc>,
    pub input_count: u64,
    pub message: String,
}

impl JobResult {
    /// One-line summary, e.g. `Cleaned up 3 old completed jobs (3 items)`.
    pub fn summary(&self) -> String {
        format!("{} ({} items)", self.message, self.input_count)
    }
}

/// A unit of asynchronous work tracked by the Gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(
        default,
        deserialize_with = "empty_string_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Check the shape rules the Gateway promises: `result` only on
    /// completed jobs, `error` only on failed ones, never both, and
    /// `updated_at >= created_at`.
    pub fn check_consistency(&self) -> DomainResult<()> {
        if self.result.is_some() && self.error.is_some() {
            return Err(DomainError::validation(format!(
                "job {}: result and error are mutually exclusive",
                self.id
            )));
        }
        if self.result.is_some() && self.status != JobStatus::Completed {
            return Err(DomainError::validation(format!(
                "job {}: result present on a {} job",
                self.id, self.status
            )));
        }
        if self.error.is_some() && self.status != JobStatus::Failed {
            return Err(DomainError::validation(format!(
                "job {}: error present on a {} job",
                self.id, self.status
            )));
        }
        if self.updated_at < self.created_at {
            return Err(DomainError::validation(format!(
                "job {}: updated_at precedes created_at",
                self.id
            )));
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Body of `GET /jobs`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobList {
    pub count: usize,
    pub jobs: Vec<Job>,
}

impl JobList {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Body of `POST /jobs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateJobRequest {
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub data: String,
}

impl CreateJobRequest {
    pub fn new(kind: impl Into<JobKind>, data: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
        }
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn completed_job_json() -> &'static str {
        r#"{
            "id": "8d0c1c36-2f4b-4c57-9a0e-1f7f5b0c9a11",
            "status": "completed",
            "type": "cleanup",
            "data": "x",
            "result": {
                "processed_at": "2026-10-15T10:00:03Z",
                "input_count": 3,
                "message": "Cleaned up 3 old completed jobs"
            },
            "created_at": "2026-10-15T10:00:00Z",
            "updated_at": "2026-10-15T10:00:03Z"
        }"#
    }

    #[test]
    fn decodes_gateway_job_shape() {
        let job: Job = serde_json::from_str(completed_job_json()).unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.kind, JobKind::Cleanup);
        assert_eq!(job.error, None);
        assert_eq!(
            job.result.as_ref().map(JobResult::summary).as_deref(),
            Some("Cleaned up 3 old completed jobs (3 items)")
        );
        job.check_consistency().unwrap();
    }

    #[test]
    fn empty_error_string_means_no_error() {
        let job: Job = serde_json::from_str(
            r#"{"id":"1","status":"pending","type":"cleanup","data":"x","error":"",
                "created_at":"2026-10-15T10:00:00Z","updated_at":"2026-10-15T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(job.error, None);
    }

    #[test]
    fn unknown_kind_round_trips_verbatim() {
        let kind: JobKind = serde_json::from_str("\"reindex-search\"").unwrap();
        assert_eq!(kind, JobKind::Other("reindex-search".to_string()));
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"reindex-search\"");
    }

    #[test]
    fn create_request_uses_type_field() {
        let body = serde_json::to_value(CreateJobRequest::new(JobKind::Cleanup, "x")).unwrap();
        assert_eq!(body, serde_json::json!({"type": "cleanup", "data": "x"}));
    }

    #[test]
    fn result_on_failed_job_is_inconsistent() {
        let mut job: Job = serde_json::from_str(completed_job_json()).unwrap();
        job.status = JobStatus::Failed;
        assert!(matches!(job.check_consistency(), Err(DomainError::Validation(_))));

        job.error = Some("boom".to_string());
        assert!(job.check_consistency().is_err());
    }

    #[test]
    fn terminal_statuses_never_move() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(matches!(
            JobStatus::Failed.check_transition(JobStatus::Pending),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Completed".parse::<JobStatus>().unwrap(), JobStatus::Completed);
        assert!("done".parse::<JobStatus>().is_err());
    }

    proptest! {
        /// Property: along any path of allowed transitions the rank never
        /// decreases, so a status never reverts.
        #[test]
        fn allowed_paths_are_monotonic(steps in prop::collection::vec(0usize..4, 1..12)) {
            let mut current = JobStatus::Pending;
            for idx in steps {
                let next = JobStatus::ALL[idx];
                if current.can_transition_to(next) {
                    prop_assert!(next.rank() >= current.rank());
                    current = next;
                }
            }
        }
    }
}
