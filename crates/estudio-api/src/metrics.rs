//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::{Captures, Regex};

use estudio_models::JobStatus;

/// Install the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics. Fails if a recorder
/// is already installed in this process.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "estudio_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "estudio_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "estudio_http_requests_in_flight";

    // Job lifecycle metrics
    pub const JOBS_CREATED_TOTAL: &str = "estudio_jobs_created_total";
    pub const JOB_TRANSITIONS_TOTAL: &str = "estudio_job_transitions_total";
    pub const JOBS_STALE_TOTAL: &str = "estudio_jobs_stale_total";
    pub const JOBS_PURGED_TOTAL: &str = "estudio_jobs_purged_total";

    // Live event streams
    pub const EVENT_STREAMS_ACTIVE: &str = "estudio_event_streams_active";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "estudio_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record job created.
pub fn record_job_created() {
    counter!(names::JOBS_CREATED_TOTAL).increment(1);
}

/// Record a job entering `status`.
pub fn record_job_transition(status: JobStatus) {
    let labels = [("status", status.as_str().to_string())];
    counter!(names::JOB_TRANSITIONS_TOTAL, &labels).increment(1);
}

/// Record a processing job failed by the stale detector.
pub fn record_stale_job() {
    counter!(names::JOBS_STALE_TOTAL).increment(1);
}

/// Record finished jobs removed by the retention sweep.
pub fn record_jobs_purged(count: usize) {
    counter!(names::JOBS_PURGED_TOTAL).increment(count as u64);
}

/// Counts an open event stream until dropped.
pub struct EventStreamGuard(());

impl EventStreamGuard {
    pub fn open() -> Self {
        gauge!(names::EVENT_STREAMS_ACTIVE).increment(1.0);
        Self(())
    }
}

impl Drop for EventStreamGuard {
    fn drop(&mut self) {
        gauge!(names::EVENT_STREAMS_ACTIVE).decrement(1.0);
    }
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Sanitize path for metrics labels (collapse job IDs).
fn sanitize_path(path: &str) -> String {
    static JOB_SEGMENT: OnceLock<Option<Regex>> = OnceLock::new();

    let Some(re) = JOB_SEGMENT
        .get_or_init(|| Regex::new(r"^/jobs/([^/]+)").ok())
        .as_ref()
    else {
        return path.to_string();
    };

    re.replace(path, |caps: &Captures| {
        if &caps[1] == "stats" {
            caps[0].to_string()
        } else {
            "/jobs/:id".to_string()
        }
    })
    .into_owned()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/jobs/550e8400-e29b-41d4-a716-446655440000"),
            "/jobs/:id"
        );
        assert_eq!(
            sanitize_path("/jobs/550e8400-e29b-41d4-a716-446655440000/cancel"),
            "/jobs/:id/cancel"
        );
        assert_eq!(sanitize_path("/jobs/stats"), "/jobs/stats");
        assert_eq!(sanitize_path("/jobs"), "/jobs");
        assert_eq!(sanitize_path("/health"), "/health");
    }
}
