//! Store error types.

use estudio_models::{JobError, JobId, JobStatus};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Cannot transition job from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Update contention: {0}")]
    Contention(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(id: &JobId) -> Self {
        Self::NotFound(id.clone())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Errors caused by the caller rather than the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::InvalidTransition { .. }
        )
    }
}

impl From<JobError> for StoreError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Validation(msg) => Self::Validation(msg),
            JobError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
        }
    }
}
