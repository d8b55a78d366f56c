//! Queue statistics computed from the job store.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use estudio_models::QueueStats;

use crate::error::StoreResult;
use crate::store::JobStore;

/// Read-only view over a store that derives queue statistics on demand.
#[derive(Clone)]
pub struct StatsAggregator {
    store: Arc<dyn JobStore>,
    worker_slots: u32,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn JobStore>, worker_slots: u32) -> Self {
        Self {
            store,
            worker_slots,
        }
    }

    pub async fn snapshot(&self) -> StoreResult<QueueStats> {
        self.snapshot_at(Utc::now()).await
    }

    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> StoreResult<QueueStats> {
        let jobs = self.store.all().await?;
        Ok(QueueStats::from_jobs(&jobs, self.worker_slots, now))
    }
}
