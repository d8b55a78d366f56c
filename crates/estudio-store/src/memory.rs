//! In-memory job store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use estudio_models::{Job, JobId, JobSubmission, JobUpdate};

use crate::error::{StoreError, StoreResult};
use crate::retention::RetentionPolicy;
use crate::store::{JobStore, UpdateOutcome};

/// Process-local store. Each record sits behind its own mutex so updates to
/// one job never wait on another.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Job>>>>,
    closed: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::unavailable("in-memory store is shut down"));
        }
        Ok(())
    }

    async fn entry(&self, id: &JobId) -> StoreResult<Arc<Mutex<Job>>> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, submission: JobSubmission) -> StoreResult<Job> {
        self.ensure_open()?;
        let job = Job::from_submission(submission, Utc::now())?;

        self.jobs
            .write()
            .await
            .insert(job.id.clone(), Arc::new(Mutex::new(job.clone())));

        debug!(job_id = %job.id, "Stored job in memory");
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        self.ensure_open()?;
        let entry = self.entry(id).await?;
        let job = entry.lock().await.clone();
        Ok(job)
    }

    async fn update_status(&self, id: &JobId, update: &JobUpdate) -> StoreResult<UpdateOutcome> {
        self.ensure_open()?;
        let entry = self.entry(id).await?;

        let mut job = entry.lock().await;
        let changed = job.apply(update, Utc::now())?;

        Ok(UpdateOutcome {
            job: job.clone(),
            changed,
        })
    }

    async fn all(&self) -> StoreResult<Vec<Job>> {
        self.ensure_open()?;
        let entries: Vec<Arc<Mutex<Job>>> = self.jobs.read().await.values().cloned().collect();

        let mut jobs = Vec::with_capacity(entries.len());
        for entry in entries {
            jobs.push(entry.lock().await.clone());
        }
        Ok(jobs)
    }

    async fn purge_expired(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.ensure_open()?;
        let mut jobs = self.jobs.write().await;

        let mut expired = Vec::new();
        for (id, entry) in jobs.iter() {
            if policy.is_expired(&*entry.lock().await, now) {
                expired.push(id.clone());
            }
        }
        for id in &expired {
            jobs.remove(id);
        }

        if !expired.is_empty() {
            debug!(removed = expired.len(), "Purged expired jobs from memory");
        }
        Ok(expired.len())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.ensure_open()
    }

    async fn shutdown(&self) -> StoreResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let jobs = self.len().await;
            info!(jobs, "In-memory job store shut down");
        }
        Ok(())
    }
}
