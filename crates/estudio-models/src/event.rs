//! Job change events pushed to live subscribers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Job, JobId};

/// Why an event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    /// Current state sent to a new subscriber
    Snapshot,
    Created,
    Updated,
    Cancelled,
}

impl JobEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventKind::Snapshot => "snapshot",
            JobEventKind::Created => "created",
            JobEventKind::Updated => "updated",
            JobEventKind::Cancelled => "cancelled",
        }
    }
}

/// A job change, carrying the full record after the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: JobId,
    pub kind: JobEventKind,
    pub job: Job,
}

impl JobEvent {
    pub fn new(kind: JobEventKind, job: Job) -> Self {
        Self {
            job_id: job.id.clone(),
            kind,
            job,
        }
    }

    pub fn snapshot(job: Job) -> Self {
        Self::new(JobEventKind::Snapshot, job)
    }

    pub fn created(job: Job) -> Self {
        Self::new(JobEventKind::Created, job)
    }

    pub fn updated(job: Job) -> Self {
        Self::new(JobEventKind::Updated, job)
    }

    pub fn cancelled(job: Job) -> Self {
        Self::new(JobEventKind::Cancelled, job)
    }

    /// No further events follow for this job.
    pub fn is_terminal(&self) -> bool {
        self.job.is_terminal()
    }
}
