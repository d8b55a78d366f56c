//! The job store abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use estudio_models::{Job, JobFilter, JobId, JobSubmission, JobUpdate};

use crate::error::StoreResult;
use crate::retention::RetentionPolicy;

/// Result of applying a status report.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// The record after the update
    pub job: Job,
    /// False when the report was an idempotent retry
    pub changed: bool,
}

/// Persistent home of job records.
///
/// Implementations serialize mutations of a single job: the transition in an
/// update is checked against the status at the moment of mutation, so two
/// racing terminal reports cannot both succeed.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Validate a submission and persist a new `pending` job.
    async fn create(&self, submission: JobSubmission) -> StoreResult<Job>;

    async fn get(&self, id: &JobId) -> StoreResult<Job>;

    /// Apply a status report to a job.
    async fn update_status(&self, id: &JobId, update: &JobUpdate) -> StoreResult<UpdateOutcome>;

    /// Every job currently stored, in no particular order.
    async fn all(&self) -> StoreResult<Vec<Job>>;

    /// Filtered page of jobs, newest first.
    async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        Ok(filter.apply(self.all().await?))
    }

    /// Remove finished jobs older than `policy` allows, returning how many
    /// were removed. Live jobs are never touched.
    async fn purge_expired(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<usize>;

    /// Readiness check.
    async fn ping(&self) -> StoreResult<()>;

    /// Release backend resources. Further calls may fail.
    async fn shutdown(&self) -> StoreResult<()>;
}
