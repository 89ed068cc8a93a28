//! Freshness prediction engine

mod fallback;
mod inference;
mod normalize;
mod orchestrator;

pub use fallback::{ColorStats, HeuristicClassifier};
pub use inference::{InferenceBackend, PrimaryPredictor, TractBackend};
pub use normalize::{
    ImageNormalizer, ImageSource, NormalizerConfig, DEFAULT_CHANNELS, DEFAULT_IMAGE_SIZE,
    MAX_IMAGE_BYTES,
};
pub use orchestrator::PredictionOrchestrator;

use crate::error::PredictError;
use crate::models::{ImageTensor, PredictionSource, ProbabilityVector};

/// Trait for classifier implementations
pub trait Classifier: Send + Sync {
    /// Produce a probability distribution over the freshness classes
    fn classify(&self, tensor: &ImageTensor) -> Result<ProbabilityVector, PredictError>;

    /// Which path this classifier represents
    fn source(&self) -> PredictionSource;
}
