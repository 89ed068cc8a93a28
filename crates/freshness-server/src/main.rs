//! Freshness Server - food freshness classification over HTTP
//!
//! Serves predictions from the primary ONNX model, falling back to the
//! colour heuristic whenever the model cannot be obtained or run.

use anyhow::{Context, Result};
use freshness_lib::{
    health::HealthRegistry,
    ModelProvider, PredictionOrchestrator, ProviderStatus, StructuredLogger,
};
use freshness_server::{api, config::ServerConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting freshness-server");

    let config = ServerConfig::load()?;
    info!(
        instance = %config.instance_name,
        port = config.port,
        model_path = %config.model_path.display(),
        model_url = config.model_url.as_deref().unwrap_or("none"),
        "Server configured"
    );

    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(SERVER_VERSION, &config.model_path.display().to_string());

    let provider = ModelProvider::new(config.model_config())
        .and_then(|provider| provider.with_download_timeout(config.download_timeout()))
        .context("Failed to create model provider")?;
    let orchestrator = PredictionOrchestrator::new(Arc::new(provider)).with_logger(logger.clone());

    let health_registry = HealthRegistry::new();
    health_registry
        .record_model_status(&ProviderStatus::Unloaded)
        .await;

    let app_state = Arc::new(api::AppState::new(
        Arc::new(orchestrator),
        health_registry.clone(),
        logger.clone(),
    ));

    // The heuristic fallback answers even before the model resolves
    health_registry.set_ready(true).await;
    tokio::spawn(api::warm_model(app_state.clone()));

    api::serve(config.port, app_state, shutdown_signal()).await?;

    logger.log_shutdown("signal received");
    info!("Shutting down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
