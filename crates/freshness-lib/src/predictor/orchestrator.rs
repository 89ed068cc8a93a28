//! Prediction orchestration
//!
//! Decides between the primary model and the heuristic fallback, resolves
//! the label and shapes the result. Every request ends in exactly one of:
//! primary success, fallback success, or a terminal error with no label.

use super::{
    Classifier, HeuristicClassifier, ImageNormalizer, ImageSource, PrimaryPredictor,
    DEFAULT_CHANNELS,
};
use crate::error::{ModelError, NormalizeError, PredictError};
use crate::model::{ModelHandle, ModelProvider};
use crate::models::{ImageTensor, PredictionResult, PredictionSource};
use crate::observability::{FreshnessMetrics, StructuredLogger};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Runs the inference decision pipeline for each request
pub struct PredictionOrchestrator {
    provider: Arc<ModelProvider>,
    /// Produces tensors in the geometry the model was loaded for
    normalizer: ImageNormalizer,
    metrics: FreshnessMetrics,
    logger: StructuredLogger,
}

impl PredictionOrchestrator {
    pub fn new(provider: Arc<ModelProvider>) -> Self {
        let normalizer = ImageNormalizer::with_config(provider.config().input);
        Self {
            provider,
            normalizer,
            metrics: FreshnessMetrics::new(),
            logger: StructuredLogger::new("local"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn provider(&self) -> &Arc<ModelProvider> {
        &self.provider
    }

    /// Classify one image
    ///
    /// Never fails: model problems are absorbed by the fallback and image
    /// problems come back as a terminal error result.
    pub async fn predict(&self, source: ImageSource) -> PredictionResult {
        let start = Instant::now();
        let description = source.describe();

        let handle = self.provider.handle().await;
        let normalizer = self.normalizer.clone();

        // Decoding and inference are CPU-bound
        let outcome = tokio::task::spawn_blocking(move || -> Result<PredictionResult, NormalizeError> {
            let tensor = normalizer.normalize(&source)?;
            let diagnostic = match Self::primary(handle, &tensor) {
                Ok(result) => return Ok(result),
                Err(diagnostic) => diagnostic,
            };

            // The heuristic reads RGB means
            if tensor.channels() != DEFAULT_CHANNELS {
                let rgb = ImageNormalizer::new().normalize(&source)?;
                return Ok(Self::fallback(&rgb, diagnostic));
            }
            Ok(Self::fallback(&tensor, diagnostic))
        })
        .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(source = %description, error = %e, "Failed to normalize image");
                PredictionResult::failed(e.to_string())
            }
            Err(e) => {
                error!(source = %description, error = %e, "Prediction task failed");
                PredictionResult::failed(format!("prediction task failed: {}", e))
            }
        };

        let elapsed = start.elapsed();
        self.metrics
            .record_prediction(result.source, elapsed.as_secs_f64());
        self.logger.log_prediction(&description, &result, elapsed);

        result
    }

    /// Choose primary or fallback for an already-normalized tensor
    pub fn decide(
        handle: Result<Arc<ModelHandle>, ModelError>,
        tensor: &ImageTensor,
    ) -> PredictionResult {
        match Self::primary(handle, tensor) {
            Ok(result) => result,
            Err(diagnostic) => Self::fallback(tensor, diagnostic),
        }
    }

    /// Primary result, or the diagnostic explaining why there is none
    fn primary(
        handle: Result<Arc<ModelHandle>, ModelError>,
        tensor: &ImageTensor,
    ) -> Result<PredictionResult, String> {
        match handle {
            Ok(handle) => Self::labelled(&PrimaryPredictor::new(handle), tensor, None).map_err(|e| {
                warn!(error = %e, "Primary prediction failed, using heuristic fallback");
                format!("primary prediction failed: {}", e)
            }),
            Err(e) => {
                debug!(error = %e, "No primary model, using heuristic fallback");
                Err(e.to_string())
            }
        }
    }

    fn fallback(tensor: &ImageTensor, diagnostic: String) -> PredictionResult {
        match Self::labelled(&HeuristicClassifier, tensor, Some(diagnostic)) {
            Ok(result) => result,
            Err(e) => PredictionResult::failed(format!("heuristic fallback failed: {}", e)),
        }
    }

    fn labelled(
        classifier: &dyn Classifier,
        tensor: &ImageTensor,
        diagnostic: Option<String>,
    ) -> Result<PredictionResult, PredictError> {
        let probabilities = classifier.classify(tensor)?;
        Ok(match classifier.source() {
            PredictionSource::Primary => PredictionResult::primary(probabilities),
            PredictionSource::Fallback => PredictionResult::fallback(probabilities, diagnostic),
        })
    }
}
