//! Render job definitions and the status state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

/// Message recorded when a worker reports a failure without details.
const DEFAULT_FAILURE_MESSAGE: &str = "Job failed without an error message";

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job was submitted and awaits a worker pool
    #[default]
    Pending,
    /// Job was accepted by a worker pool
    Queued,
    /// A worker is rendering the job
    Processing,
    /// Job finished and produced an output
    Completed,
    /// Job failed with an error
    Failed,
    /// Job was cancelled before finishing
    Cancelled,
}

impl JobStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no more updates accepted).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `next` is reachable from this status.
    ///
    /// Re-reporting the current non-terminal status is allowed so that worker
    /// retries and progress reports are idempotent.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }

        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Cancelled)
                | (Queued, Processing)
                | (Queued, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised while building or mutating a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),

    #[error("Cannot transition job from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

impl JobError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Payload submitted by clients to request a render.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    #[validate(
        required(message = "projectId is required"),
        length(min = 1, max = 128, message = "projectId must be 1-128 characters")
    )]
    pub project_id: Option<String>,

    #[validate(
        required(message = "userId is required"),
        length(min = 1, max = 128, message = "userId must be 1-128 characters")
    )]
    pub user_id: Option<String>,

    #[validate(
        required(message = "inputReference is required"),
        length(min = 1, max = 2048, message = "inputReference must be 1-2048 characters")
    )]
    pub input_reference: Option<String>,

    /// Render settings (resolution, codec, ...), passed through untouched
    #[serde(default)]
    pub settings: Option<Value>,

    /// Extra opaque key-value data
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl JobSubmission {
    /// Convenience constructor for the three required fields.
    pub fn new(
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        input_reference: impl Into<String>,
    ) -> Self {
        Self {
            project_id: Some(project_id.into()),
            user_id: Some(user_id.into()),
            input_reference: Some(input_reference.into()),
            settings: None,
            metadata: None,
        }
    }
}

/// Status report sent by a worker (or by the cancel endpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<u32>,
    #[serde(default)]
    pub output_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Precondition checked at mutation time: the update is dropped unless the
    /// job was last touched before this instant. Never read from the wire.
    #[serde(skip)]
    pub updated_before: Option<DateTime<Utc>>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
            output_url: None,
            error: None,
            updated_before: None,
        }
    }

    /// Only apply if the job has had no update since `cutoff`.
    pub fn only_if_updated_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.updated_before = Some(cutoff);
        self
    }

    pub fn progress(value: u32) -> Self {
        Self {
            progress: Some(value),
            ..Self::status(JobStatus::Processing)
        }
    }

    pub fn completed(output_url: impl Into<String>) -> Self {
        Self {
            output_url: Some(output_url.into()),
            ..Self::status(JobStatus::Completed)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::status(JobStatus::Failed)
        }
    }

    pub fn cancelled() -> Self {
        Self::status(JobStatus::Cancelled)
    }
}

/// A tracked render job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Current status
    pub status: JobStatus,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Rendered output location, only set once completed
    #[serde(rename = "outputUrl")]
    pub output_reference: Option<String>,

    /// Failure reason, only set once failed
    #[serde(rename = "error")]
    pub error_message: Option<String>,

    pub project_id: String,
    pub user_id: String,
    pub input_reference: String,

    #[serde(default)]
    pub settings: Value,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Validate a submission and build a fresh `pending` job from it.
    pub fn from_submission(submission: JobSubmission, now: DateTime<Utc>) -> Result<Self, JobError> {
        submission
            .validate()
            .map_err(|e| JobError::Validation(describe_validation_errors(&e)))?;

        let project_id = required_field(submission.project_id, "projectId")?;
        let user_id = required_field(submission.user_id, "userId")?;
        let input_reference = required_field(submission.input_reference, "inputReference")?;

        Ok(Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            progress: 0,
            output_reference: None,
            error_message: None,
            project_id,
            user_id,
            input_reference,
            settings: submission
                .settings
                .unwrap_or_else(|| Value::Object(Map::new())),
            metadata: submission.metadata.unwrap_or_default(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status report at `now`.
    ///
    /// Returns `Ok(true)` when the record changed and `Ok(false)` for an
    /// idempotent retry. The job is left untouched on error.
    pub fn apply(&mut self, update: &JobUpdate, now: DateTime<Utc>) -> Result<bool, JobError> {
        let from = self.status;
        let to = update.status;

        if !from.can_transition_to(to) {
            return Err(JobError::InvalidTransition { from, to });
        }

        let progress = match update.progress {
            Some(p) if p > 100 => {
                return Err(JobError::validation(format!(
                    "progress must be between 0 and 100, got {}",
                    p
                )))
            }
            Some(p) => Some(p as u8),
            None => None,
        };

        if update.updated_before.is_some_and(|cutoff| self.updated_at >= cutoff) {
            return Ok(false);
        }

        if from == to {
            // Progress only moves forward; stale reports are dropped.
            return match progress {
                Some(p) if to == JobStatus::Processing && p > self.progress => {
                    self.progress = p;
                    self.updated_at = now;
                    Ok(true)
                }
                _ => Ok(false),
            };
        }

        match to {
            JobStatus::Pending => return Err(JobError::InvalidTransition { from, to }),
            JobStatus::Queued => {}
            JobStatus::Processing => {
                self.started_at.get_or_insert(now);
                self.progress = progress.unwrap_or(0);
            }
            JobStatus::Completed => {
                let output = update
                    .output_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| JobError::validation("outputUrl is required to complete a job"))?;
                self.output_reference = Some(output.to_string());
                self.progress = 100;
                self.completed_at = Some(self.finish_time(now));
            }
            JobStatus::Failed => {
                let message = update
                    .error
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(DEFAULT_FAILURE_MESSAGE);
                self.error_message = Some(message.to_string());
                self.completed_at = Some(self.finish_time(now));
            }
            JobStatus::Cancelled => {
                self.completed_at = Some(self.finish_time(now));
            }
        }

        self.status = to;
        self.updated_at = now;
        Ok(true)
    }

    /// Seconds spent rendering, measured up to `now` while still processing.
    pub fn duration_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or(now);
        Some((end - started).num_seconds().max(0))
    }

    /// Linear estimate of the remaining render time based on progress so far.
    pub fn estimated_remaining_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.status != JobStatus::Processing || self.progress == 0 {
            return None;
        }
        let elapsed_ms = (now - self.started_at?).num_milliseconds().max(0) as f64;
        let per_percent = elapsed_ms / f64::from(self.progress);
        let remaining_ms = per_percent * f64::from(100 - self.progress);
        Some((remaining_ms / 1000.0).round() as i64)
    }

    // Never earlier than `started_at`, even with a skewed clock.
    fn finish_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.started_at {
            Some(started) if started > now => started,
            _ => now,
        }
    }
}

fn required_field(value: Option<String>, name: &str) -> Result<String, JobError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(JobError::validation(format!("{} is required", name))),
    }
}

/// Flatten validator output into a single stable message.
fn describe_validation_errors(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(msg) => msg.to_string(),
                None => format!("{} is invalid ({})", field, e.code),
            })
        })
        .collect();
    messages.sort();
    messages.dedup();
    messages.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn submission() -> JobSubmission {
        JobSubmission::new("p1", "u1", "s3://in")
    }

    fn new_job() -> Job {
        Job::from_submission(submission(), Utc::now()).unwrap()
    }

    #[test]
    fn test_job_id_generation() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_from_submission_defaults() {
        let job = new_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.project_id, "p1");
        assert_eq!(job.input_reference, "s3://in");
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
        assert!(job.output_reference.is_none());
        assert_eq!(job.settings, Value::Object(Map::new()));
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn test_missing_project_id_is_rejected() {
        let mut sub = submission();
        sub.project_id = None;
        let err = Job::from_submission(sub, Utc::now()).unwrap_err();
        assert_eq!(err, JobError::validation("projectId is required"));
    }

    #[test]
    fn test_blank_fields_are_rejected() {
        let mut sub = submission();
        sub.user_id = Some("   ".to_string());
        let err = Job::from_submission(sub, Utc::now()).unwrap_err();
        assert!(matches!(err, JobError::Validation(msg) if msg.contains("userId")));

        let mut sub = submission();
        sub.input_reference = Some(String::new());
        let err = Job::from_submission(sub, Utc::now()).unwrap_err();
        assert!(matches!(err, JobError::Validation(msg) if msg.contains("inputReference")));
    }

    #[test]
    fn test_transition_table() {
        use JobStatus::*;

        assert!(Pending.can_transition_to(Queued));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Queued.can_transition_to(Processing));
        assert!(Queued.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Queued.can_transition_to(Failed));
        assert!(!Queued.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Queued));

        for terminal in [Completed, Failed, Cancelled] {
            for next in JobStatus::ALL {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let mut job = new_job();
        let now = job.created_at;

        assert!(job.apply(&JobUpdate::status(JobStatus::Queued), now).unwrap());
        assert!(job
            .apply(&JobUpdate::progress(40), now + Duration::seconds(1))
            .unwrap());
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 40);
        assert!(job.started_at.is_some());

        assert!(job
            .apply(&JobUpdate::completed("s3://out"), now + Duration::seconds(5))
            .unwrap());
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.output_reference.as_deref(), Some("s3://out"));
        assert!(job.started_at.unwrap() <= job.completed_at.unwrap());

        let err = job
            .apply(&JobUpdate::status(JobStatus::Processing), now + Duration::seconds(6))
            .unwrap_err();
        assert_eq!(
            err,
            JobError::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Processing
            }
        );
    }

    #[test]
    fn test_progress_never_decreases() {
        let mut job = new_job();
        let now = Utc::now();
        job.apply(&JobUpdate::status(JobStatus::Queued), now).unwrap();
        job.apply(&JobUpdate::progress(60), now).unwrap();

        assert!(!job.apply(&JobUpdate::progress(30), now).unwrap());
        assert_eq!(job.progress, 60);

        assert!(job.apply(&JobUpdate::progress(75), now).unwrap());
        assert_eq!(job.progress, 75);
    }

    #[test]
    fn test_progress_out_of_range() {
        let mut job = new_job();
        let now = Utc::now();
        job.apply(&JobUpdate::status(JobStatus::Queued), now).unwrap();
        let err = job.apply(&JobUpdate::progress(101), now).unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_same_status_is_noop() {
        let mut job = new_job();
        let before = job.clone();
        assert!(!job
            .apply(&JobUpdate::status(JobStatus::Pending), Utc::now())
            .unwrap());
        assert_eq!(job, before);
    }

    #[test]
    fn test_terminal_same_status_is_rejected() {
        let mut job = new_job();
        job.apply(&JobUpdate::cancelled(), Utc::now()).unwrap();
        let err = job.apply(&JobUpdate::cancelled(), Utc::now()).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
    }

    #[test]
    fn test_completion_requires_output() {
        let mut job = new_job();
        let now = Utc::now();
        job.apply(&JobUpdate::status(JobStatus::Queued), now).unwrap();
        job.apply(&JobUpdate::progress(10), now).unwrap();

        let err = job
            .apply(&JobUpdate::status(JobStatus::Completed), now)
            .unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.output_reference.is_none());
    }

    #[test]
    fn test_failure_records_message() {
        let mut job = new_job();
        let now = Utc::now();
        job.apply(&JobUpdate::status(JobStatus::Queued), now).unwrap();
        job.apply(&JobUpdate::progress(55), now).unwrap();
        job.apply(&JobUpdate::failed("ffmpeg exited with code 1"), now)
            .unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("ffmpeg exited with code 1"));
        assert_eq!(job.progress, 55);
        assert!(job.output_reference.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_failure_without_message() {
        let mut job = new_job();
        let now = Utc::now();
        job.apply(&JobUpdate::status(JobStatus::Queued), now).unwrap();
        job.apply(&JobUpdate::progress(1), now).unwrap();
        job.apply(&JobUpdate::status(JobStatus::Failed), now).unwrap();
        assert_eq!(job.error_message.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
    }

    #[test]
    fn test_cancel_from_pending_has_no_start() {
        let mut job = new_job();
        job.apply(&JobUpdate::cancelled(), Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_some());
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_duration_and_estimate() {
        let mut job = new_job();
        let start = Utc::now();
        job.apply(&JobUpdate::status(JobStatus::Queued), start).unwrap();
        job.apply(&JobUpdate::progress(0), start).unwrap();
        assert_eq!(job.estimated_remaining_secs(start), None);

        job.apply(&JobUpdate::progress(25), start + Duration::seconds(10))
            .unwrap();
        let now = start + Duration::seconds(10);
        assert_eq!(job.duration_secs(now), Some(10));
        assert_eq!(job.estimated_remaining_secs(now), Some(30));

        job.apply(&JobUpdate::completed("s3://out"), start + Duration::seconds(40))
            .unwrap();
        assert_eq!(job.duration_secs(start + Duration::seconds(100)), Some(40));
        assert_eq!(job.estimated_remaining_secs(start + Duration::seconds(100)), None);
    }

    #[test]
    fn test_conditional_update_checks_last_touch() {
        let start = Utc::now();
        let mut job = Job::from_submission(submission(), start).unwrap();
        job.apply(&JobUpdate::status(JobStatus::Queued), start).unwrap();
        job.apply(&JobUpdate::progress(20), start + Duration::seconds(10))
            .unwrap();

        // Touched at +10s, so a cutoff at +5s no longer holds
        let stale_fail =
            JobUpdate::failed("timed out").only_if_updated_before(start + Duration::seconds(5));
        assert!(!job.apply(&stale_fail, start + Duration::seconds(60)).unwrap());
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.error_message.is_none());

        let fail =
            JobUpdate::failed("timed out").only_if_updated_before(start + Duration::seconds(30));
        assert!(job.apply(&fail, start + Duration::seconds(60)).unwrap());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_precondition_is_not_read_from_wire() {
        let update: JobUpdate = serde_json::from_value(serde_json::json!({
            "status": "failed",
            "updatedBefore": "2020-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(update.updated_before.is_none());
    }

    #[test]
    fn test_wire_field_names() {
        let mut job = new_job();
        let now = Utc::now();
        job.apply(&JobUpdate::status(JobStatus::Queued), now).unwrap();
        job.apply(&JobUpdate::progress(5), now).unwrap();
        job.apply(&JobUpdate::completed("s3://out"), now).unwrap();

        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["outputUrl"], "s3://out");
        assert!(value["error"].is_null());
        assert!(value.get("startedAt").is_some());
        assert!(value.get("projectId").is_some());

        let schema = schemars::schema_for!(Job);
        let schema = serde_json::to_value(&schema).unwrap();
        assert!(schema["properties"].get("outputUrl").is_some());
    }
}
