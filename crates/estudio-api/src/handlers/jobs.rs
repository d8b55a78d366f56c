//! Render job handlers.
//!
//! Provides REST API endpoints for:
//! - Submitting, fetching, listing and cancelling jobs
//! - Worker status reports
//! - Queue statistics
//! - Live job events over Server-Sent Events

use std::convert::Infallible;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use estudio_models::{Job, JobEvent, JobFilter, JobId, JobSubmission, JobUpdate, QueueStats};

use crate::error::{ApiError, ApiResult};
use crate::metrics::EventStreamGuard;
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

/// A job plus fields derived at response time.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: Job,
    /// Seconds spent rendering so far, null until started
    pub duration_secs: Option<i64>,
    /// Linear estimate while processing, null otherwise
    pub estimated_time_remaining_secs: Option<i64>,
}

impl JobResponse {
    pub fn at(job: Job, now: DateTime<Utc>) -> Self {
        Self {
            duration_secs: job.duration_secs(now),
            estimated_time_remaining_secs: job.estimated_remaining_secs(now),
            job,
        }
    }
}

/// Page of jobs.
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub count: usize,
    pub limit: usize,
    pub offset: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /jobs
///
/// Returns:
/// - 201: The created job, status `pending`
/// - 400: Malformed body or missing required field
pub async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<JobSubmission>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    let Json(submission) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let job = state.jobs.create(submission).await?;
    Ok((StatusCode::CREATED, Json(JobResponse::at(job, Utc::now()))))
}

/// GET /jobs
///
/// Query parameters: `status`, `projectId`, `userId`, `createdAfter`,
/// `createdBefore`, `limit`, `offset`. Newest jobs first.
pub async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<JobFilter>, QueryRejection>,
) -> ApiResult<Json<JobListResponse>> {
    let Query(filter) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let jobs = state.jobs.list(&filter).await?;
    let now = Utc::now();
    let jobs: Vec<JobResponse> = jobs.into_iter().map(|j| JobResponse::at(j, now)).collect();

    Ok(Json(JobListResponse {
        count: jobs.len(),
        limit: filter.page_size(),
        offset: filter.offset.unwrap_or(0),
        jobs,
    }))
}

/// GET /jobs/stats
pub async fn job_stats(State(state): State<AppState>) -> ApiResult<Json<QueueStats>> {
    Ok(Json(state.stats.snapshot().await?))
}

/// GET /jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let id = parse_job_id(&job_id)?;
    let job = state.jobs.get(&id).await?;
    Ok(Json(JobResponse::at(job, Utc::now())))
}

/// POST /jobs/:id/cancel
///
/// Returns:
/// - 200: The cancelled job
/// - 404: Unknown job
/// - 409: Job already reached a terminal state
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let id = parse_job_id(&job_id)?;
    let job = state.jobs.cancel(&id).await?;
    Ok(Json(JobResponse::at(job, Utc::now())))
}

/// POST /jobs/:id/status
///
/// Status report from a worker: `{ status, progress?, outputUrl?, error? }`.
///
/// Returns:
/// - 200: The job after the report (unchanged for idempotent retries)
/// - 400: Malformed report, progress out of range, or completion without output
/// - 404: Unknown job
/// - 409: Transition not allowed from the current status
pub async fn report_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    payload: Result<Json<JobUpdate>, JsonRejection>,
) -> ApiResult<Json<JobResponse>> {
    let id = parse_job_id(&job_id)?;
    let Json(update) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let job = state.jobs.report_status(&id, &update).await?;
    Ok(Json(JobResponse::at(job, Utc::now())))
}

/// GET /jobs/:id/events
///
/// SSE stream. The first event is the current snapshot, then one event per
/// change. The stream ends after the job reaches a terminal state.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let id = parse_job_id(&job_id)?;

    // Subscribe before reading so no change falls between snapshot and stream
    let mut rx = state.progress.subscribe();
    let snapshot = state.jobs.get(&id).await?;
    let jobs = state.jobs.clone();

    debug!(job_id = %id, "Opened job event stream");

    let stream = async_stream::stream! {
        let _guard = EventStreamGuard::open();

        let mut cursor = EventCursor::at(&snapshot);
        let mut finished = snapshot.is_terminal();
        yield Ok::<_, Infallible>(sse_event(&JobEvent::snapshot(snapshot)));

        while !finished {
            match rx.recv().await {
                Ok(event) => {
                    if cursor.advance(&event) {
                        finished = event.is_terminal();
                        yield Ok::<_, Infallible>(sse_event(&event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(job_id = %id, skipped, "Event stream lagged, resending snapshot");
                    match jobs.get(&id).await {
                        Ok(job) => {
                            cursor = EventCursor::at(&job);
                            finished = job.is_terminal();
                            yield Ok::<_, Infallible>(sse_event(&JobEvent::snapshot(job)));
                        }
                        Err(e) => {
                            warn!(job_id = %id, error = %e, "Failed to reload job for event stream");
                            finished = true;
                        }
                    }
                }
                Err(RecvError::Closed) => finished = true,
            }
        }

        debug!(job_id = %id, "Closed job event stream");
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============================================================================
// Helpers
// ============================================================================

/// Newest state of one job already sent on a stream.
///
/// Events are published after the store releases the job, so two reports can
/// reach subscribers out of order, and events queued before the snapshot was
/// read can repeat older state. Only strictly newer states pass.
struct EventCursor {
    job_id: JobId,
    last_sent: DateTime<Utc>,
}

impl EventCursor {
    fn at(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            last_sent: job.updated_at,
        }
    }

    /// Accept `event` if it belongs to this job and is newer than anything
    /// sent so far.
    fn advance(&mut self, event: &JobEvent) -> bool {
        if event.job_id != self.job_id || event.job.updated_at <= self.last_sent {
            return false;
        }
        self.last_sent = event.job.updated_at;
        true
    }
}

fn sse_event(event: &JobEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        warn!(job_id = %event.job_id, error = %e, "Failed to encode job event");
        String::from("{}")
    });
    Event::default().event(event.kind.as_str()).data(data)
}

/// Malformed ids cannot exist, so they are reported as not found.
fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    if !is_valid_job_id(raw) {
        return Err(ApiError::not_found("Job not found"));
    }
    Ok(JobId::from_string(raw))
}

/// Validate job ID format (alphanumeric with dashes, 8-64 chars).
fn is_valid_job_id(id: &str) -> bool {
    if id.len() > 64 || id.len() < 8 {
        return false;
    }
    id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use estudio_models::{JobStatus, JobUpdate};

    #[test]
    fn test_valid_job_ids() {
        assert!(is_valid_job_id("12345678"));
        assert!(is_valid_job_id("abc-1234-def"));
        assert!(is_valid_job_id(JobId::new().as_str()));
    }

    #[test]
    fn test_invalid_job_ids() {
        assert!(!is_valid_job_id(""));
        assert!(!is_valid_job_id("short"));
        assert!(!is_valid_job_id("has space"));
        assert!(!is_valid_job_id("has_underscore"));
        assert!(!is_valid_job_id("has.dot"));
        assert!(!is_valid_job_id(&"a".repeat(65)));
    }

    #[test]
    fn test_cursor_drops_older_and_foreign_events() {
        let start = Utc::now();
        let mut job =
            Job::from_submission(JobSubmission::new("p1", "u1", "s3://in"), start).unwrap();
        job.apply(&JobUpdate::status(JobStatus::Queued), start).unwrap();
        let mut cursor = EventCursor::at(&job);

        // Same state as the snapshot
        assert!(!cursor.advance(&JobEvent::updated(job.clone())));

        let mut at_50 = job.clone();
        at_50
            .apply(&JobUpdate::progress(50), start + chrono::Duration::seconds(1))
            .unwrap();
        let mut at_60 = at_50.clone();
        at_60
            .apply(&JobUpdate::progress(60), start + chrono::Duration::seconds(2))
            .unwrap();

        // 60 arrives first, the late 50 is dropped
        assert!(cursor.advance(&JobEvent::updated(at_60)));
        assert!(!cursor.advance(&JobEvent::updated(at_50)));

        let other =
            Job::from_submission(JobSubmission::new("p1", "u1", "s3://in"), start).unwrap();
        let mut other_later = other;
        other_later
            .apply(&JobUpdate::cancelled(), start + chrono::Duration::seconds(5))
            .unwrap();
        assert!(!cursor.advance(&JobEvent::cancelled(other_later)));
    }

    #[test]
    fn test_job_response_derived_fields() {
        let start = Utc::now();
        let mut job =
            Job::from_submission(JobSubmission::new("p1", "u1", "s3://in"), start).unwrap();

        let value = serde_json::to_value(JobResponse::at(job.clone(), start)).unwrap();
        assert!(value["durationSecs"].is_null());
        assert!(value["estimatedTimeRemainingSecs"].is_null());
        assert_eq!(value["status"], "pending");
        assert_eq!(value["projectId"], "p1");

        job.apply(&JobUpdate::status(JobStatus::Queued), start).unwrap();
        job.apply(&JobUpdate::progress(50), start).unwrap();
        let later = start + chrono::Duration::seconds(20);

        let value = serde_json::to_value(JobResponse::at(job, later)).unwrap();
        assert_eq!(value["durationSecs"], 20);
        assert_eq!(value["estimatedTimeRemainingSecs"], 20);
        assert_eq!(value["progress"], 50);
    }
}
