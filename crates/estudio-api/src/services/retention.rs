//! Background removal of finished jobs past their retention age.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use estudio_store::{JobStore, RetentionPolicy, StoreResult};

use crate::config::ApiConfig;
use crate::metrics;

pub struct RetentionSweeper {
    store: Arc<dyn JobStore>,
    policy: RetentionPolicy,
    interval: Duration,
    enabled: bool,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn JobStore>, config: &ApiConfig) -> Self {
        Self {
            store,
            policy: config.retention_policy(),
            interval: config.retention_interval.max(Duration::from_secs(1)),
            enabled: config.retention_enabled,
        }
    }

    /// Sweep on every interval tick until the task is aborted.
    pub async fn run(&self) {
        if !self.enabled {
            info!("Job retention sweep is disabled");
            return;
        }

        info!(
            "Starting job retention sweep (interval: {:?}, completed: {}s, failed: {}s)",
            self.interval,
            self.policy.completed.num_seconds(),
            self.policy.failed.num_seconds()
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.sweep_at(Utc::now()).await {
                Ok(0) => {}
                Ok(removed) => info!("Retention sweep removed {} finished jobs", removed),
                Err(e) => error!("Retention sweep error: {}", e),
            }
        }
    }

    /// Remove every job expired as of `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let removed = self.store.purge_expired(&self.policy, now).await?;
        if removed > 0 {
            metrics::record_jobs_purged(removed);
        }
        Ok(removed)
    }
}
