//! Store backend selection.

use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::memory::InMemoryJobStore;
use crate::progress::ProgressChannel;
use crate::redis_store::{RedisJobStore, DEFAULT_MAX_UPDATE_ATTEMPTS};
use crate::store::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

impl FromStr for StoreBackend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "inmemory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(StoreError::Config(format!(
                "unknown JOB_STORE backend '{}', expected 'memory' or 'redis'",
                other
            ))),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Redis URL, used by the Redis backend
    pub redis_url: String,
    /// Prefix for every Redis key
    pub key_prefix: String,
    /// Compare-and-set attempts before an update gives up
    pub max_update_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "estudio:jobs".to_string(),
            max_update_attempts: DEFAULT_MAX_UPDATE_ATTEMPTS,
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let backend = match std::env::var("JOB_STORE") {
            Ok(value) => value.parse()?,
            Err(_) => StoreBackend::Memory,
        };

        Ok(Self {
            backend,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("REDIS_KEY_PREFIX")
                .unwrap_or_else(|_| "estudio:jobs".to_string()),
            max_update_attempts: std::env::var("STORE_MAX_UPDATE_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_UPDATE_ATTEMPTS),
        })
    }

    /// Build the configured store.
    pub async fn connect(&self) -> StoreResult<Arc<dyn JobStore>> {
        let store: Arc<dyn JobStore> = match self.backend {
            StoreBackend::Memory => Arc::new(InMemoryJobStore::new()),
            StoreBackend::Redis => Arc::new(
                RedisJobStore::connect(
                    &self.redis_url,
                    self.key_prefix.clone(),
                    self.max_update_attempts,
                )
                .await?,
            ),
        };

        info!(backend = store.backend_name(), "Job store ready");
        Ok(store)
    }

    /// Build the event channel matching the backend. Redis-backed stores
    /// share events between replicas over `{prefix}:events`.
    pub async fn progress_channel(&self, capacity: usize) -> StoreResult<ProgressChannel> {
        match self.backend {
            StoreBackend::Memory => Ok(ProgressChannel::new(capacity)),
            StoreBackend::Redis => {
                ProgressChannel::connect_redis(&self.redis_url, self.events_channel(), capacity)
                    .await
            }
        }
    }

    pub fn events_channel(&self) -> String {
        format!("{}:events", self.key_prefix)
    }
}
