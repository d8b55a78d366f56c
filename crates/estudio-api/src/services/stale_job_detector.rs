//! Background service for detecting and failing stale jobs.
//!
//! A job is stale when it is `processing` and its worker has not reported
//! anything for longer than the configured threshold. Stale jobs are failed
//! through the normal status path so subscribers see the outcome. The failure
//! is conditional on the job still being silent when the store applies it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use estudio_models::{JobStatus, JobUpdate};
use estudio_store::{StoreError, StoreResult};

use crate::config::ApiConfig;
use crate::metrics;
use crate::services::JobService;

/// Error recorded on jobs failed by the detector.
pub const STALE_JOB_ERROR: &str =
    "Processing timed out. The worker stopped reporting progress. Please try again.";

/// Stale job detector service.
pub struct StaleJobDetector {
    jobs: JobService,
    threshold: chrono::Duration,
    interval: Duration,
    enabled: bool,
}

impl StaleJobDetector {
    pub fn new(jobs: JobService, config: &ApiConfig) -> Self {
        Self {
            jobs,
            threshold: chrono::Duration::from_std(config.stale_job_threshold)
                .unwrap_or_else(|_| chrono::Duration::days(36_500)),
            interval: config.stale_detection_interval.max(Duration::from_secs(1)),
            enabled: config.stale_detection_enabled,
        }
    }

    /// Start the background detection loop.
    ///
    /// Runs until the task is aborted and should be spawned as a background task.
    pub async fn run(&self) {
        if !self.enabled {
            info!("Stale job detection is disabled");
            return;
        }

        info!(
            "Starting stale job detector (interval: {:?}, threshold: {}s)",
            self.interval,
            self.threshold.num_seconds()
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.check_once_at(Utc::now()).await {
                Ok((0, _)) => {}
                Ok((stale, recovered)) => info!(
                    "Stale job detection complete: {} stale, {} recovered",
                    stale, recovered
                ),
                Err(e) => error!("Stale job detection error: {}", e),
            }
        }
    }

    /// Run a single sweep as of `now`. Returns `(stale, recovered)` counts.
    pub async fn check_once_at(&self, now: DateTime<Utc>) -> StoreResult<(u32, u32)> {
        let Some(cutoff) = now.checked_sub_signed(self.threshold) else {
            return Ok((0, 0));
        };
        let mut stale_count = 0u32;
        let mut recovered_count = 0u32;

        for job in self.jobs.all().await? {
            if job.status != JobStatus::Processing || job.updated_at >= cutoff {
                continue;
            }
            stale_count += 1;

            warn!(
                job_id = %job.id,
                progress = job.progress,
                last_update = %job.updated_at,
                "Detected stale job (no worker report)"
            );

            // Re-checked against the stored record when the update is applied
            let update = JobUpdate::failed(STALE_JOB_ERROR).only_if_updated_before(cutoff);
            match self.jobs.apply_update(&job.id, &update).await {
                Ok(outcome) if outcome.changed => {
                    recovered_count += 1;
                    metrics::record_stale_job();
                }
                Ok(_) => {
                    debug!(job_id = %job.id, "Stale job reported again before recovery");
                }
                // The worker reported an outcome in the meantime
                Err(StoreError::InvalidTransition { .. }) => {
                    debug!(job_id = %job.id, "Stale job finished before recovery");
                }
                Err(e) => error!(job_id = %job.id, "Failed to recover stale job: {}", e),
            }
        }

        Ok((stale_count, recovered_count))
    }
}
