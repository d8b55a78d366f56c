//! Redis-backed job store.
//!
//! Layout:
//! - `{prefix}:job:{id}` holds the JSON-encoded job
//! - `{prefix}:index` is a sorted set of job ids scored by creation time (ms)
//!
//! Updates are optimistic: read the record, apply the transition locally, then
//! swap it in with a compare-and-set script. A lost race re-reads and retries,
//! so the transition is always validated against the latest stored status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

use estudio_models::{Job, JobFilter, JobId, JobSubmission, JobUpdate};

use crate::error::{StoreError, StoreResult};
use crate::retention::RetentionPolicy;
use crate::store::{JobStore, UpdateOutcome};

/// Default number of compare-and-set attempts per update.
pub const DEFAULT_MAX_UPDATE_ATTEMPTS: u32 = 8;

const COMPARE_AND_SET: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
else
    return 0
end
"#;

pub struct RedisJobStore {
    conn: MultiplexedConnection,
    prefix: String,
    max_update_attempts: u32,
    compare_and_set: Script,
}

impl RedisJobStore {
    /// Open a multiplexed connection to `redis_url`.
    pub async fn connect(
        redis_url: &str,
        prefix: impl Into<String>,
        max_update_attempts: u32,
    ) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let prefix = prefix.into();

        info!(prefix = %prefix, "Connected Redis job store");

        Ok(Self {
            conn,
            prefix,
            max_update_attempts: max_update_attempts.max(1),
            compare_and_set: Script::new(COMPARE_AND_SET),
        })
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn index_key(&self) -> String {
        format!("{}:index", self.prefix)
    }

    /// Fetch and decode jobs for `ids`, skipping ids whose record vanished.
    async fn load_many(&self, ids: &[String]) -> StoreResult<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| self.job_key(&JobId::from_string(id.as_str())))
            .collect();

        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        let mut jobs = Vec::with_capacity(raw.len());
        for (id, payload) in ids.iter().zip(raw) {
            match payload {
                Some(payload) => jobs.push(serde_json::from_str(&payload)?),
                None => warn!(job_id = %id, "Indexed job has no record"),
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn create(&self, submission: JobSubmission) -> StoreResult<Job> {
        let job = Job::from_submission(submission, Utc::now())?;
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.conn.clone();

        let (stored,): (Option<String>,) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.job_key(&job.id))
            .arg(&payload)
            .arg("NX")
            .cmd("ZADD")
            .arg(self.index_key())
            .arg(job.created_at.timestamp_millis())
            .arg(job.id.as_str())
            .ignore()
            .query_async(&mut conn)
            .await?;

        if stored.is_none() {
            return Err(StoreError::Contention(format!(
                "job id {} already exists",
                job.id
            )));
        }

        debug!(job_id = %job.id, "Stored job in Redis");
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.job_key(id)).await?;
        let raw = raw.ok_or_else(|| StoreError::not_found(id))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn update_status(&self, id: &JobId, update: &JobUpdate) -> StoreResult<UpdateOutcome> {
        let key = self.job_key(id);
        let mut conn = self.conn.clone();

        for attempt in 1..=self.max_update_attempts {
            let current: Option<String> = conn.get(&key).await?;
            let current = current.ok_or_else(|| StoreError::not_found(id))?;

            let mut job: Job = serde_json::from_str(&current)?;
            let changed = job.apply(update, Utc::now())?;
            if !changed {
                return Ok(UpdateOutcome { job, changed });
            }

            let next = serde_json::to_string(&job)?;
            let swapped: i32 = self
                .compare_and_set
                .key(&key)
                .arg(&current)
                .arg(&next)
                .invoke_async(&mut conn)
                .await?;

            if swapped == 1 {
                return Ok(UpdateOutcome { job, changed });
            }

            debug!(job_id = %id, attempt, "Job changed concurrently, retrying update");
        }

        warn!(
            job_id = %id,
            attempts = self.max_update_attempts,
            "Giving up on contended job update"
        );
        Err(StoreError::Contention(format!(
            "job {} changed concurrently {} times",
            id, self.max_update_attempts
        )))
    }

    async fn all(&self) -> StoreResult<Vec<Job>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrange(self.index_key(), 0, -1).await?;
        self.load_many(&ids).await
    }

    async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        // Narrow by creation time on the index, the rest is filtered in process.
        let (max, min) = index_score_range(filter);

        let mut conn = self.conn.clone();
        let ids: Vec<String> = redis::cmd("ZREVRANGEBYSCORE")
            .arg(self.index_key())
            .arg(max)
            .arg(min)
            .query_async(&mut conn)
            .await?;

        let jobs = self.load_many(&ids).await?;
        Ok(filter.apply(jobs))
    }

    async fn purge_expired(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        // Terminal records never change again, so a plain delete is safe.
        let expired: Vec<JobId> = self
            .all()
            .await?
            .into_iter()
            .filter(|job| policy.is_expired(job, now))
            .map(|job| job.id)
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = expired.iter().map(|id| self.job_key(id)).collect();
        let members: Vec<&str> = expired.iter().map(JobId::as_str).collect();

        let mut conn = self.conn.clone();
        let () = redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(&keys)
            .ignore()
            .cmd("ZREM")
            .arg(self.index_key())
            .arg(&members)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(removed = expired.len(), "Purged expired jobs from Redis");
        Ok(expired.len())
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn shutdown(&self) -> StoreResult<()> {
        // The multiplexed connection closes once the last clone drops.
        info!(prefix = %self.prefix, "Redis job store shut down");
        Ok(())
    }
}

/// `(max, min)` index scores covering the filter's creation range.
///
/// Both bounds are inclusive at millisecond precision. Index scores lose the
/// sub-millisecond part, so exclusivity of `created_before` is left to
/// `JobFilter::apply`.
fn index_score_range(filter: &JobFilter) -> (String, String) {
    let max = filter
        .created_before
        .map(|t| t.timestamp_millis().to_string())
        .unwrap_or_else(|| "+inf".to_string());
    let min = filter
        .created_after
        .map(|t| t.timestamp_millis().to_string())
        .unwrap_or_else(|| "-inf".to_string());
    (max, min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use estudio_models::JobStatus;

    #[test]
    fn test_index_range_keeps_same_millisecond() {
        let before = Utc.timestamp_opt(1_700_000_000, 5_300_000).unwrap();
        let filter = JobFilter {
            created_before: Some(before),
            created_after: Some(before - Duration::seconds(1)),
            ..JobFilter::default()
        };

        let (max, min) = index_score_range(&filter);
        assert_eq!(max, "1700000000005");
        assert_eq!(min, "1699999999005");

        let (max, min) = index_score_range(&JobFilter::default());
        assert_eq!((max.as_str(), min.as_str()), ("+inf", "-inf"));
    }

    async fn store() -> RedisJobStore {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let prefix = format!("estudio:test:{}", JobId::new());
        RedisJobStore::connect(&url, prefix, DEFAULT_MAX_UPDATE_ATTEMPTS)
            .await
            .expect("redis available")
    }

    #[tokio::test]
    #[ignore = "requires redis"]
    async fn test_lifecycle_round_trip() {
        let store = store().await;
        store.ping().await.unwrap();

        let job = store
            .create(JobSubmission::new("p1", "u1", "s3://in"))
            .await
            .unwrap();
        assert_eq!(store.get(&job.id).await.unwrap(), job);

        store
            .update_status(&job.id, &JobUpdate::status(JobStatus::Queued))
            .await
            .unwrap();
        store
            .update_status(&job.id, &JobUpdate::progress(40))
            .await
            .unwrap();
        let done = store
            .update_status(&job.id, &JobUpdate::completed("s3://out"))
            .await
            .unwrap();
        assert_eq!(done.job.status, JobStatus::Completed);

        let err = store
            .update_status(&job.id, &JobUpdate::progress(50))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let listed = store.list(&JobFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(store.all().await.unwrap().len(), 1);

        // Same millisecond as the job, still after it
        let filter = JobFilter {
            created_before: Some(job.created_at + Duration::microseconds(1)),
            ..JobFilter::default()
        };
        assert_eq!(store.list(&filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires redis"]
    async fn test_purge_drops_record_and_index_entry() {
        let store = store().await;
        let job = store
            .create(JobSubmission::new("p1", "u1", "s3://in"))
            .await
            .unwrap();
        store
            .update_status(&job.id, &JobUpdate::cancelled())
            .await
            .unwrap();
        let live = store
            .create(JobSubmission::new("p1", "u1", "s3://in"))
            .await
            .unwrap();

        let policy = RetentionPolicy::default();
        let removed = store
            .purge_expired(&policy, Utc::now() + Duration::days(8))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        assert!(matches!(store.get(&job.id).await, Err(StoreError::NotFound(_))));
        let remaining = store.all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, live.id);
    }

    #[tokio::test]
    #[ignore = "requires redis"]
    async fn test_missing_job() {
        let store = store().await;
        let err = store.get(&JobId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
