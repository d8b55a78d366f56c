//! Render job tracker API server binary.

use std::net::SocketAddr;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use estudio_api::{
    create_router, metrics, ApiConfig, AppState, RetentionSweeper, StaleJobDetector,
};
use estudio_store::StoreConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("estudio_api=info,estudio_store=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting estudio-api");

    let config = ApiConfig::from_env();
    info!(
        "API config: host={}, port={}, environment={}, worker_capacity={}",
        config.host, config.port, config.environment, config.worker_capacity
    );

    if config.is_production() && config.cors_origins.iter().any(|o| o == "*") {
        warn!("CORS allows any origin in production");
    }

    let store_config = StoreConfig::from_env().context("invalid job store configuration")?;
    let store = store_config
        .connect()
        .await
        .context("failed to connect job store")?;

    let progress = store_config
        .progress_channel(config.event_channel_capacity)
        .await
        .context("failed to open job event channel")?;

    let state = AppState::with_progress(config.clone(), store, progress);

    let metrics_handle = if config.metrics_enabled {
        match metrics::init_metrics() {
            Ok(handle) => {
                info!("Prometheus metrics enabled at /metrics");
                Some(handle)
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder, metrics disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    // Start stale job detector background task
    let stale_detector = StaleJobDetector::new(state.jobs.clone(), &config);
    let detector_task = tokio::spawn(async move {
        stale_detector.run().await;
    });

    // Start retention sweep background task
    let retention = RetentionSweeper::new(state.store.clone(), &config);
    let retention_task = tokio::spawn(async move {
        retention.run().await;
    });

    let store = state.store.clone();
    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid bind address")?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    detector_task.abort();
    retention_task.abort();
    if let Err(e) = store.shutdown().await {
        error!("Failed to shut down job store: {}", e);
    }

    served.context("server error")?;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
