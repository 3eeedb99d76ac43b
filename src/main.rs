use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use parcel_market::api;
use parcel_market::config;
use parcel_market::engine::deadlines::run_deadline_scheduler;
use parcel_market::error::AppError;
use parcel_market::state::AppState;

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let shared_state = Arc::new(AppState::new(
        config.engine.clone(),
        config.event_buffer_size,
    ));

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_deadline_scheduler(
        shared_state.deadlines.clone(),
        Duration::from_secs(config.deadline_scan_interval_secs.max(1)),
        config.deadline_scan_dry_run,
    ));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    let pending = shared_state.effects.pending();
    if pending > 0 {
        tracing::info!(pending, "waiting for notifications to drain");
        if tokio::time::timeout(SHUTDOWN_DRAIN, shared_state.effects.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                pending = shared_state.effects.pending(),
                "shutting down with notifications still in flight"
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
