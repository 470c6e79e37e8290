use anyhow::{Context, Result};
use fieldsync::api::{create_router, AppState};
use fieldsync::config::BridgeConfig;
use fieldsync::install::run_pending_cleanup;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsync=info".into()),
        )
        .init();

    info!("fieldsync starting...");

    let config = BridgeConfig::load().context("Failed to load configuration")?;
    info!(
        bind_addr = %config.server.bind_addr,
        db_path = %config.store.db_path,
        provider = %config.provider.base_url,
        staleness_hours = config.tokens.staleness_hours,
        "Configuration loaded"
    );

    let state = AppState::from_config(&config)?;
    let locations = state
        .store
        .list_locations()
        .context("Failed to read installed locations")?;
    info!(installed = locations.len(), "Account store ready");

    let cleanup_handle = tokio::spawn(run_pending_cleanup(
        Arc::clone(&state.store),
        chrono::Duration::seconds(config.install.correlation_window_seconds),
        config.install.cleanup_interval_seconds,
    ));

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(config.server.bind_addr)
        .await
        .context("Failed to bind HTTP listener")?;
    info!(addr = %config.server.bind_addr, "HTTP API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    cleanup_handle.abort();
    info!("fieldsync stopped");

    Ok(())
}
