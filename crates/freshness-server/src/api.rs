//! HTTP API for predictions, model management, health checks and metrics

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use freshness_lib::{
    health::HealthRegistry,
    predictor::MAX_IMAGE_BYTES,
    ImageSource, PredictionOrchestrator, ProviderStatus, StructuredLogger,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Multipart field names accepted for the uploaded image
const IMAGE_FIELDS: [&str; 2] = ["image", "file"];

/// Room for multipart framing on top of the image itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PredictionOrchestrator>,
    pub health_registry: HealthRegistry,
    pub logger: StructuredLogger,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<PredictionOrchestrator>,
        health_registry: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            orchestrator,
            health_registry,
            logger,
        }
    }

    async fn publish_model_status(&self, status: &ProviderStatus) {
        self.health_registry.record_model_status(status).await;
        self.logger.log_model_status(status);
    }
}

/// Model status as served by `GET /model` and `POST /model/reload`
#[derive(Debug, Serialize)]
pub struct ModelStatusResponse {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    pub status: ProviderStatus,
}

impl ModelStatusResponse {
    fn new(state: &AppState, status: ProviderStatus) -> Self {
        let config = state.orchestrator.provider().config();
        Self {
            path: config.local_path.clone(),
            remote_url: config.remote_url.clone(),
            status,
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Classify an uploaded image
///
/// 200 with the result, 422 when the image could not be classified, 400 when
/// no image was sent.
async fn predict(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(e) => {
            warn!(error = %e.body_text(), "Rejected non-multipart prediction request");
            return error_response(StatusCode::BAD_REQUEST, "No image provided");
        }
    };

    let mut upload = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if !field.name().is_some_and(|name| IMAGE_FIELDS.contains(&name)) {
                    continue;
                }
                let extension = field
                    .file_name()
                    .and_then(|name| Path::new(name).extension())
                    .and_then(|ext| ext.to_str())
                    .map(str::to_ascii_lowercase);
                match field.bytes().await {
                    Ok(data) => {
                        upload = Some(ImageSource::bytes(data.to_vec(), extension));
                        break;
                    }
                    Err(e) => return error_response(e.status(), e.body_text()),
                }
            }
            Ok(None) => break,
            Err(e) => return error_response(e.status(), e.body_text()),
        }
    }

    let Some(source) = upload else {
        return error_response(StatusCode::BAD_REQUEST, "No image provided");
    };

    let result = state.orchestrator.predict(source).await;
    let status = if result.is_terminal_error() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    };

    (status, Json(result)).into_response()
}

/// Current provider state without triggering a load
async fn model_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.orchestrator.provider().status();
    Json(ModelStatusResponse::new(&state, status))
}

/// Discard the cached model outcome and resolve again
async fn reload_model(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.orchestrator.provider().reload().await;
    state.publish_model_status(&status).await;
    Json(ModelStatusResponse::new(&state, status))
}

/// Health check response - always 200; `degraded` while serving the fallback
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health_registry.health().await)
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics");
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/model", get(model_status))
        .route("/model/reload", post(reload_model))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + MULTIPART_OVERHEAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Resolve the model ahead of the first request
pub async fn warm_model(state: Arc<AppState>) {
    let provider = state.orchestrator.provider();
    if let Err(e) = provider.handle().await {
        warn!(error = %e, "Model warm-up failed, serving heuristic fallback");
    }
    state.publish_model_status(&provider.status()).await;
}

/// Start the API server, stopping when `shutdown` resolves
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
