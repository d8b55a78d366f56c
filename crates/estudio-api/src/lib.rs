//! Axum HTTP API server for render job tracking.
//!
//! This crate provides:
//! - Job submission, lookup, listing, cancellation and worker status reports
//! - Queue statistics and live job events over SSE
//! - Rate limiting and security headers
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{JobService, RetentionSweeper, StaleJobDetector};
pub use state::AppState;
