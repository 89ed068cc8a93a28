//! Error types for the inference pipeline
//!
//! Every stage returns a typed outcome; the orchestrator decides which of
//! these are recoverable through the heuristic fallback.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn an image source into a tensor
#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("image not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to read image {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode image: {0}")]
    ImageDecode(String),

    #[error("image of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },
}

/// Failure to acquire or load the primary model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// No artifact could be obtained; recoverable by fallback
    #[error("model unavailable: {0}")]
    Unavailable(String),

    /// The artifact exists but does not parse or validate
    #[error("model corrupt at {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl ModelError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, ModelError::Corrupt { .. })
    }
}

/// Failure while producing a probability vector
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictError {
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("invalid model output: {0}")]
    InvalidOutput(String),

    #[error("invalid image tensor: {0}")]
    InvalidTensor(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

/// Result type for normalization
pub type NormalizeResult<T> = std::result::Result<T, NormalizeError>;
