//! Job persistence for the render job tracker.
//!
//! This crate provides:
//! - The `JobStore` trait and its in-memory and Redis backends
//! - The stats aggregator built on top of a store
//! - Retention of finished jobs
//! - A progress channel for job change events, relayed through Redis when
//!   the Redis backend is used

pub mod config;
pub mod error;
pub mod memory;
pub mod progress;
pub mod redis_store;
pub mod retention;
pub mod stats;
pub mod store;

pub use config::{StoreBackend, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryJobStore;
pub use progress::ProgressChannel;
pub use redis_store::RedisJobStore;
pub use retention::RetentionPolicy;
pub use stats::StatsAggregator;
pub use store::{JobStore, UpdateOutcome};
