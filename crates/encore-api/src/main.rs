//! Encore API Server
//!
//! Author: hephaex@gmail.com

use encore_api::{auth::spawn_purge_task, create_router, state::AppState};
use encore_core::config::{AppConfig, LoggingConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "encore_api={level},audit={level},tower_http=info",
            level = logging.level
        ))
    });

    if logging.json_format {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::var("ENCORE_CONFIG").ok().map(PathBuf::from);
    let config = AppConfig::load(config_path)?;

    // Initialize tracing
    init_tracing(&config.logging);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let purge_interval = Duration::from_secs(config.auth.purge_interval_secs);

    // Create application state
    let state = Arc::new(AppState::from_config(config).await?);

    // Background hygiene for expired refresh records
    let purge = spawn_purge_task(state.tokens.clone(), purge_interval);

    // Create router
    let app = create_router(state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Encore API Server starting on http://{}", addr);
    tracing::info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    if let Some(handle) = purge {
        handle.abort();
    }

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    // Readiness probes fail while in-flight requests drain
    state.set_ready(false);
    tracing::info!("Shutting down");
}
