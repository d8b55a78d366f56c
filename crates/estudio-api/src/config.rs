//! API configuration.

use std::time::Duration;

use estudio_store::retention::{
    RetentionPolicy, DEFAULT_COMPLETED_RETENTION_SECS, DEFAULT_FAILED_RETENTION_SECS,
};

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second, per client IP
    pub rate_limit_rps: u32,
    /// Rate limit burst
    pub rate_limit_burst: u32,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Worker slots reported in queue statistics
    pub worker_capacity: u32,
    /// Expose Prometheus metrics at /metrics
    pub metrics_enabled: bool,
    /// Events buffered per live subscriber
    pub event_channel_capacity: usize,
    /// Run the stale job detector
    pub stale_detection_enabled: bool,
    /// Processing jobs silent for longer than this are failed
    pub stale_job_threshold: Duration,
    /// Interval between stale job sweeps
    pub stale_detection_interval: Duration,
    /// Run the retention sweep for finished jobs
    pub retention_enabled: bool,
    /// Interval between retention sweeps
    pub retention_interval: Duration,
    /// How long completed jobs are kept
    pub completed_job_retention: Duration,
    /// How long failed jobs are kept
    pub failed_job_retention: Duration,
    /// How long cancelled jobs are kept
    pub cancelled_job_retention: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 50,
            rate_limit_burst: 100,
            max_body_size: 1024 * 1024, // 1MB
            environment: "development".to_string(),
            worker_capacity: 3,
            metrics_enabled: true,
            event_channel_capacity: 256,
            stale_detection_enabled: true,
            stale_job_threshold: Duration::from_secs(30 * 60),
            stale_detection_interval: Duration::from_secs(30),
            retention_enabled: true,
            retention_interval: Duration::from_secs(60 * 60),
            completed_job_retention: Duration::from_secs(DEFAULT_COMPLETED_RETENTION_SECS),
            failed_job_retention: Duration::from_secs(DEFAULT_FAILED_RETENTION_SECS),
            cancelled_job_retention: Duration::from_secs(DEFAULT_FAILED_RETENTION_SECS),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT").unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_parse("RATE_LIMIT_RPS").unwrap_or(defaults.rate_limit_rps),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST").unwrap_or(defaults.rate_limit_burst),
            max_body_size: env_parse("MAX_BODY_SIZE").unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            worker_capacity: env_parse("WORKER_CAPACITY").unwrap_or(defaults.worker_capacity),
            metrics_enabled: env_flag("METRICS_ENABLED").unwrap_or(defaults.metrics_enabled),
            event_channel_capacity: env_parse("EVENT_CHANNEL_CAPACITY")
                .unwrap_or(defaults.event_channel_capacity),
            stale_detection_enabled: env_flag("ENABLE_STALE_DETECTION")
                .unwrap_or(defaults.stale_detection_enabled),
            stale_job_threshold: env_parse("STALE_JOB_THRESHOLD_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_job_threshold),
            stale_detection_interval: env_parse("STALE_DETECTION_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_detection_interval),
            retention_enabled: env_flag("ENABLE_JOB_RETENTION")
                .unwrap_or(defaults.retention_enabled),
            retention_interval: env_parse("RETENTION_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention_interval),
            completed_job_retention: env_parse("COMPLETED_JOB_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.completed_job_retention),
            failed_job_retention: env_parse("FAILED_JOB_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.failed_job_retention),
            cancelled_job_retention: env_parse("CANCELLED_JOB_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cancelled_job_retention),
        }
    }

    /// Retention ages as a store policy.
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::from_secs(
            self.completed_job_retention.as_secs(),
            self.failed_job_retention.as_secs(),
            self.cancelled_job_retention.as_secs(),
        )
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
}
