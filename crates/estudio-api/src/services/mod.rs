//! Business logic services.

pub mod job;
pub mod retention;
pub mod stale_job_detector;

pub use job::JobService;
pub use retention::RetentionSweeper;
pub use stale_job_detector::StaleJobDetector;
