//! Application state.

use std::sync::Arc;

use estudio_store::{JobStore, ProgressChannel, StatsAggregator};

use crate::config::ApiConfig;
use crate::services::JobService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn JobStore>,
    pub jobs: JobService,
    pub stats: StatsAggregator,
    pub progress: ProgressChannel,
}

impl AppState {
    /// Create application state around an already connected store, with a
    /// process-local event channel.
    pub fn new(config: ApiConfig, store: Arc<dyn JobStore>) -> Self {
        let progress = ProgressChannel::new(config.event_channel_capacity);
        Self::with_progress(config, store, progress)
    }

    pub fn with_progress(
        config: ApiConfig,
        store: Arc<dyn JobStore>,
        progress: ProgressChannel,
    ) -> Self {
        let jobs = JobService::new(Arc::clone(&store), progress.clone());
        let stats = StatsAggregator::new(Arc::clone(&store), config.worker_capacity);

        Self {
            config,
            store,
            jobs,
            stats,
            progress,
        }
    }
}
