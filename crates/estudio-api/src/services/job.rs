//! Job lifecycle operations shared by the HTTP handlers and background tasks.

use std::sync::Arc;

use tracing::{debug, info, warn};

use estudio_models::{
    Job, JobEvent, JobEventKind, JobFilter, JobId, JobStatus, JobSubmission, JobUpdate,
};
use estudio_store::{JobStore, ProgressChannel, StoreResult, UpdateOutcome};

use crate::metrics;

/// Wraps the job store and publishes a `JobEvent` for every change.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    progress: ProgressChannel,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, progress: ProgressChannel) -> Self {
        Self { store, progress }
    }

    pub fn progress(&self) -> &ProgressChannel {
        &self.progress
    }

    pub async fn create(&self, submission: JobSubmission) -> StoreResult<Job> {
        let job = self.store.create(submission).await?;

        info!(
            job_id = %job.id,
            project_id = %job.project_id,
            user_id = %job.user_id,
            "Created render job"
        );
        metrics::record_job_created();
        self.progress.publish(JobEvent::created(job.clone())).await;

        Ok(job)
    }

    pub async fn get(&self, id: &JobId) -> StoreResult<Job> {
        self.store.get(id).await
    }

    pub async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        self.store.list(filter).await
    }

    pub async fn all(&self) -> StoreResult<Vec<Job>> {
        self.store.all().await
    }

    /// Apply a worker status report.
    pub async fn report_status(&self, id: &JobId, update: &JobUpdate) -> StoreResult<Job> {
        Ok(self.apply_update(id, update).await?.job)
    }

    /// Apply an update and report whether it changed the job.
    pub async fn apply_update(
        &self,
        id: &JobId,
        update: &JobUpdate,
    ) -> StoreResult<UpdateOutcome> {
        let outcome = match self.store.update_status(id, update).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_client_error() {
                    debug!(job_id = %id, status = %update.status, error = %e, "Rejected status report");
                } else {
                    warn!(job_id = %id, status = %update.status, error = %e, "Status report failed");
                }
                return Err(e);
            }
        };

        if !outcome.changed {
            debug!(job_id = %id, status = %update.status, "Status report was a no-op");
            return Ok(outcome);
        }

        let job = &outcome.job;
        match job.status {
            JobStatus::Processing if update.progress.is_some() => {
                debug!(job_id = %id, progress = job.progress, "Job progress updated");
            }
            JobStatus::Failed => {
                warn!(
                    job_id = %id,
                    error = job.error_message.as_deref().unwrap_or_default(),
                    "Job failed"
                );
            }
            status => {
                info!(job_id = %id, status = %status, progress = job.progress, "Job status changed");
            }
        }

        metrics::record_job_transition(job.status);

        let kind = if job.status == JobStatus::Cancelled {
            JobEventKind::Cancelled
        } else {
            JobEventKind::Updated
        };
        self.progress.publish(JobEvent::new(kind, job.clone())).await;

        Ok(outcome)
    }

    /// Cancel a job that has not reached a terminal state.
    pub async fn cancel(&self, id: &JobId) -> StoreResult<Job> {
        self.report_status(id, &JobUpdate::cancelled()).await
    }
}
