//! How long finished jobs are kept.

use chrono::{DateTime, Duration, Utc};

use estudio_models::{Job, JobStatus};

/// Default age after which completed jobs are removed.
pub const DEFAULT_COMPLETED_RETENTION_SECS: u64 = 24 * 60 * 60;

/// Default age after which failed and cancelled jobs are removed.
pub const DEFAULT_FAILED_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;

/// Maximum age per terminal status, measured from `completed_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub completed: Duration,
    pub failed: Duration,
    pub cancelled: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_secs(
            DEFAULT_COMPLETED_RETENTION_SECS,
            DEFAULT_FAILED_RETENTION_SECS,
            DEFAULT_FAILED_RETENTION_SECS,
        )
    }
}

impl RetentionPolicy {
    pub fn from_secs(completed: u64, failed: u64, cancelled: u64) -> Self {
        Self {
            completed: secs(completed),
            failed: secs(failed),
            cancelled: secs(cancelled),
        }
    }

    /// Age limit for `status`, `None` for jobs that are still live.
    pub fn max_age(&self, status: JobStatus) -> Option<Duration> {
        match status {
            JobStatus::Completed => Some(self.completed),
            JobStatus::Failed => Some(self.failed),
            JobStatus::Cancelled => Some(self.cancelled),
            JobStatus::Pending | JobStatus::Queued | JobStatus::Processing => None,
        }
    }

    /// Whether `job` finished long enough before `now` to be removed.
    pub fn is_expired(&self, job: &Job, now: DateTime<Utc>) -> bool {
        let Some(max_age) = self.max_age(job.status) else {
            return false;
        };
        let finished = job.completed_at.unwrap_or(job.updated_at);
        now.signed_duration_since(finished) >= max_age
    }
}

// Capped at the largest span chrono accepts.
fn secs(value: u64) -> Duration {
    let max = (i64::MAX / 1000) as u64;
    Duration::seconds(value.min(max) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use estudio_models::{JobSubmission, JobUpdate};

    fn finished(update: JobUpdate, at: DateTime<Utc>) -> Job {
        let mut job = Job::from_submission(JobSubmission::new("p1", "u1", "s3://in"), at).unwrap();
        job.apply(&JobUpdate::status(JobStatus::Queued), at).unwrap();
        job.apply(&JobUpdate::progress(10), at).unwrap();
        job.apply(&update, at).unwrap();
        job
    }

    #[test]
    fn test_completed_jobs_expire_after_a_day() {
        let policy = RetentionPolicy::default();
        let done_at = Utc::now();
        let job = finished(JobUpdate::completed("s3://out"), done_at);

        assert!(!policy.is_expired(&job, done_at + Duration::hours(23)));
        assert!(policy.is_expired(&job, done_at + Duration::hours(24)));
    }

    #[test]
    fn test_failed_jobs_are_kept_a_week() {
        let policy = RetentionPolicy::default();
        let done_at = Utc::now();
        let job = finished(JobUpdate::failed("boom"), done_at);

        assert!(!policy.is_expired(&job, done_at + Duration::days(6)));
        assert!(policy.is_expired(&job, done_at + Duration::days(7)));
    }

    #[test]
    fn test_live_jobs_never_expire() {
        let policy = RetentionPolicy::from_secs(0, 0, 0);
        let created = Utc::now();
        let job = Job::from_submission(JobSubmission::new("p1", "u1", "s3://in"), created).unwrap();

        assert!(!policy.is_expired(&job, created + Duration::days(365)));
        assert_eq!(policy.max_age(JobStatus::Processing), None);
    }
}
