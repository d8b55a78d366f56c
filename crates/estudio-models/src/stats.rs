//! Queue statistics derived from job records.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Job, JobStatus};

/// Worker slot usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WorkerCapacity {
    pub total: u32,
    pub available: u32,
    pub busy: u32,
}

impl WorkerCapacity {
    /// Busy slots are the jobs currently processing. Workers may over-commit,
    /// so `busy` can exceed `total`; `available` never goes negative.
    pub fn from_processing(total: u32, processing: u64) -> Self {
        let busy = u32::try_from(processing).unwrap_or(u32::MAX);
        Self {
            total,
            available: total.saturating_sub(busy),
            busy,
        }
    }
}

/// Queued jobs above which the queue is overloaded.
pub const OVERLOADED_QUEUE_DEPTH: u64 = 20;

/// Queued jobs above which the queue is busy.
pub const BUSY_QUEUE_DEPTH: u64 = 10;

/// Failed share of finished renders above which the queue is degraded.
pub const DEGRADED_FAILURE_RATE: f64 = 0.1;

/// Coarse queue condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QueueHealthStatus {
    #[default]
    Healthy,
    Busy,
    Overloaded,
    Degraded,
}

/// Health summary derived from queue counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueHealth {
    pub status: QueueHealthStatus,
    /// Share of worker slots free, in percent
    pub processing_capacity: u32,
    /// Failed renders as a percentage of finished ones (completed + failed)
    pub error_rate: f64,
}

impl QueueHealth {
    pub fn from_stats(stats: &QueueStats) -> Self {
        let queued = stats.count(JobStatus::Queued);
        let completed = stats.count(JobStatus::Completed);
        let failed = stats.count(JobStatus::Failed);

        let failure_rate = match completed + failed {
            0 => 0.0,
            finished => failed as f64 / finished as f64,
        };

        let status = if queued > OVERLOADED_QUEUE_DEPTH {
            QueueHealthStatus::Overloaded
        } else if queued > BUSY_QUEUE_DEPTH {
            QueueHealthStatus::Busy
        } else if failure_rate > DEGRADED_FAILURE_RATE {
            QueueHealthStatus::Degraded
        } else {
            QueueHealthStatus::Healthy
        };

        let capacity = &stats.worker_capacity;
        let processing_capacity = match capacity.total {
            0 => 0,
            total => (f64::from(capacity.available) * 100.0 / f64::from(total)).round() as u32,
        };

        Self {
            status,
            processing_capacity,
            error_rate: (failure_rate * 10_000.0).round() / 100.0,
        }
    }
}

/// Per-status counts plus derived capacity figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: u64,
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Number of jobs in the store
    pub total: u64,
    /// Mean seconds between submission and start, over started jobs
    pub average_wait_secs: f64,
    /// Jobs completed during the hour before `now`
    pub throughput_per_hour: u64,
    pub worker_capacity: WorkerCapacity,
    pub health: QueueHealth,
}

impl QueueStats {
    /// Aggregate `jobs` against `worker_slots` configured slots.
    pub fn from_jobs<'a>(
        jobs: impl IntoIterator<Item = &'a Job>,
        worker_slots: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let hour_ago = now - Duration::hours(1);
        let mut stats = QueueStats::default();
        let mut wait_total_ms: i64 = 0;
        let mut started: u64 = 0;

        for job in jobs {
            stats.total += 1;
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }

            if let Some(started_at) = job.started_at {
                wait_total_ms += (started_at - job.created_at).num_milliseconds().max(0);
                started += 1;
            }

            if job.status == JobStatus::Completed
                && job.completed_at.is_some_and(|t| t > hour_ago && t <= now)
            {
                stats.throughput_per_hour += 1;
            }
        }

        if started > 0 {
            stats.average_wait_secs = (wait_total_ms as f64 / started as f64) / 1000.0;
        }
        stats.worker_capacity = WorkerCapacity::from_processing(worker_slots, stats.processing);
        stats.health = QueueHealth::from_stats(&stats);
        stats
    }

    pub fn count(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Queued => self.queued,
            JobStatus::Processing => self.processing,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Cancelled => self.cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobSubmission, JobUpdate};

    fn job_in(status: JobStatus, base: DateTime<Utc>) -> Job {
        let mut job = Job::from_submission(JobSubmission::new("p", "u", "s3://in"), base).unwrap();
        match status {
            JobStatus::Pending => {}
            JobStatus::Processing => {
                job.apply(&JobUpdate::status(JobStatus::Queued), base).unwrap();
                job.apply(&JobUpdate::progress(10), base + Duration::seconds(4))
                    .unwrap();
            }
            JobStatus::Completed => {
                job.apply(&JobUpdate::status(JobStatus::Queued), base).unwrap();
                job.apply(&JobUpdate::progress(10), base + Duration::seconds(2))
                    .unwrap();
                job.apply(&JobUpdate::completed("s3://out"), base + Duration::seconds(5))
                    .unwrap();
            }
            other => panic!("unsupported fixture status {}", other),
        }
        job
    }

    #[test]
    fn test_counts_per_status() {
        let now = Utc::now();
        let base = now - Duration::minutes(10);
        let jobs = vec![
            job_in(JobStatus::Pending, base),
            job_in(JobStatus::Processing, base),
            job_in(JobStatus::Completed, base),
        ];
        let stats = QueueStats::from_jobs(&jobs, 3, now);

        assert_eq!(stats.pending, 1);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.cancelled, 0);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.throughput_per_hour, 1);
        assert_eq!(
            stats.worker_capacity,
            WorkerCapacity {
                total: 3,
                available: 2,
                busy: 1
            }
        );
        // Processing waited 4s, completed waited 2s.
        assert!((stats.average_wait_secs - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_store() {
        let stats = QueueStats::from_jobs(&[], 4, Utc::now());
        assert_eq!(stats.total, 0);
        assert_eq!(stats.average_wait_secs, 0.0);
        assert_eq!(stats.worker_capacity.available, 4);
    }

    #[test]
    fn test_capacity_saturates() {
        let capacity = WorkerCapacity::from_processing(2, 5);
        assert_eq!(capacity.available, 0);
        assert_eq!(capacity.busy, 5);
    }

    #[test]
    fn test_wire_format() {
        let stats = QueueStats::from_jobs(&[], 3, Utc::now());
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["workerCapacity"]["total"], 3);
        assert!(value.get("throughputPerHour").is_some());
        assert_eq!(value["health"]["status"], "healthy");
        assert_eq!(value["health"]["processingCapacity"], 100);
        assert_eq!(value["health"]["errorRate"], 0.0);
    }

    fn counts(queued: u64, completed: u64, failed: u64) -> QueueStats {
        QueueStats {
            queued,
            completed,
            failed,
            worker_capacity: WorkerCapacity::from_processing(4, 1),
            ..QueueStats::default()
        }
    }

    #[test]
    fn test_queue_depth_drives_health() {
        assert_eq!(
            QueueHealth::from_stats(&counts(10, 0, 0)).status,
            QueueHealthStatus::Healthy
        );
        assert_eq!(
            QueueHealth::from_stats(&counts(11, 0, 0)).status,
            QueueHealthStatus::Busy
        );
        assert_eq!(
            QueueHealth::from_stats(&counts(21, 0, 0)).status,
            QueueHealthStatus::Overloaded
        );
        // Depth wins over failures
        assert_eq!(
            QueueHealth::from_stats(&counts(21, 1, 9)).status,
            QueueHealthStatus::Overloaded
        );
    }

    #[test]
    fn test_failure_rate_drives_health() {
        let health = QueueHealth::from_stats(&counts(0, 9, 1));
        assert_eq!(health.status, QueueHealthStatus::Healthy);
        assert_eq!(health.error_rate, 10.0);

        let health = QueueHealth::from_stats(&counts(0, 2, 1));
        assert_eq!(health.status, QueueHealthStatus::Degraded);
        assert_eq!(health.error_rate, 33.33);
        assert_eq!(health.processing_capacity, 75);
    }

    #[test]
    fn test_health_without_workers() {
        let stats = QueueStats::from_jobs(&[], 0, Utc::now());
        assert_eq!(stats.health.processing_capacity, 0);
        assert_eq!(stats.health.status, QueueHealthStatus::Healthy);
    }
}
