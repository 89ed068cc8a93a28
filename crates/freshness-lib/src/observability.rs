//! Observability infrastructure for the freshness classifier
//!
//! Provides:
//! - Prometheus metrics (prediction latency, predictions by source, model state)
//! - Structured JSON logging with tracing

use crate::model::ProviderStatus;
use crate::models::{PredictionResult, PredictionSource};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, GaugeVec, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for end-to-end prediction latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<FreshnessMetricsInner> = OnceLock::new();

struct FreshnessMetricsInner {
    prediction_latency_seconds: Histogram,
    predictions: IntCounterVec,
    prediction_errors: IntCounter,
    model_loaded: IntGauge,
    model_info: GaugeVec,
    download_failures: IntCounter,
}

impl FreshnessMetricsInner {
    fn new() -> Self {
        Self {
            prediction_latency_seconds: register_histogram!(
                "freshness_prediction_latency_seconds",
                "End-to-end time to classify one image",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            predictions: register_int_counter_vec!(
                "freshness_predictions_total",
                "Successful predictions by producing classifier",
                &["source"]
            )
            .expect("Failed to register predictions_total"),

            prediction_errors: register_int_counter!(
                "freshness_prediction_errors_total",
                "Requests that ended in a terminal error"
            )
            .expect("Failed to register prediction_errors_total"),

            model_loaded: register_int_gauge!(
                "freshness_model_loaded",
                "1 when the primary model is loaded, 0 otherwise"
            )
            .expect("Failed to register model_loaded"),

            model_info: register_gauge_vec!(
                "freshness_model_info",
                "Checksum of the currently loaded model",
                &["checksum"]
            )
            .expect("Failed to register model_info"),

            download_failures: register_int_counter!(
                "freshness_model_download_failures_total",
                "Failed attempts to download the model artifact"
            )
            .expect("Failed to register model_download_failures_total"),
        }
    }
}

/// Lightweight handle to the global metrics instance
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct FreshnessMetrics {
    _private: (),
}

impl Default for FreshnessMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FreshnessMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(FreshnessMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &FreshnessMetricsInner {
        GLOBAL_METRICS.get_or_init(FreshnessMetricsInner::new)
    }

    /// Record the outcome of one request
    ///
    /// `None` means the request ended in a terminal error.
    pub fn record_prediction(&self, source: Option<PredictionSource>, duration_secs: f64) {
        let inner = self.inner();
        inner.prediction_latency_seconds.observe(duration_secs);
        match source {
            Some(source) => inner.predictions.with_label_values(&[source.as_str()]).inc(),
            None => inner.prediction_errors.inc(),
        }
    }

    /// Publish the loaded model, or clear it with `None`
    pub fn set_model_loaded(&self, checksum: Option<&str>) {
        let inner = self.inner();
        inner.model_info.reset();
        match checksum {
            Some(checksum) => {
                inner.model_loaded.set(1);
                inner.model_info.with_label_values(&[checksum]).set(1.0);
            }
            None => inner.model_loaded.set(0),
        }
    }

    pub fn inc_download_failures(&self) {
        self.inner().download_failures.inc();
    }
}

/// Structured logger for classifier events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log one classified request
    pub fn log_prediction(&self, image: &str, result: &PredictionResult, elapsed: Duration) {
        match (result.label, result.source) {
            (Some(label), Some(source)) => {
                info!(
                    event = "prediction",
                    instance = %self.instance,
                    image = %image,
                    label = %label,
                    source = source.as_str(),
                    diagnostic = result.error.as_deref().unwrap_or(""),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Image classified"
                );
            }
            _ => {
                warn!(
                    event = "prediction_failed",
                    instance = %self.instance,
                    image = %image,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Image could not be classified"
                );
            }
        }
    }

    /// Log a model provider state change
    pub fn log_model_status(&self, status: &ProviderStatus) {
        match status {
            ProviderStatus::Loaded { model } => {
                info!(
                    event = "model_loaded",
                    instance = %self.instance,
                    path = %model.path.display(),
                    checksum = %model.checksum,
                    size_bytes = model.size_bytes,
                    "Primary model ready"
                );
            }
            ProviderStatus::Unavailable { reason } | ProviderStatus::Corrupt { reason } => {
                warn!(
                    event = "model_unavailable",
                    instance = %self.instance,
                    reason = %reason,
                    "Primary model not available, serving heuristic fallback"
                );
            }
            ProviderStatus::Unloaded | ProviderStatus::Loading => {
                info!(
                    event = "model_pending",
                    instance = %self.instance,
                    "Primary model not loaded yet"
                );
            }
        }
    }

    pub fn log_startup(&self, version: &str, model_path: &str) {
        info!(
            event = "service_started",
            instance = %self.instance,
            version = %version,
            model_path = %model_path,
            "Freshness classifier started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Freshness classifier shutting down"
        );
    }
}
