//! Shared data models for the render job tracker.
//!
//! This crate provides Serde-serializable types for:
//! - Render jobs and their status state machine
//! - Job submissions and worker status reports
//! - List filters and queue statistics
//! - Progress events pushed to subscribers

pub mod event;
pub mod filter;
pub mod job;
pub mod stats;

// Re-export common types
pub use event::{JobEvent, JobEventKind};
pub use filter::{JobFilter, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
pub use job::{Job, JobError, JobId, JobStatus, JobSubmission, JobUpdate};
pub use stats::{QueueHealth, QueueHealthStatus, QueueStats, WorkerCapacity};
