//! Food freshness classification library
//!
//! This crate provides the core functionality for:
//! - Image normalization into model-ready tensors
//! - Lazy, single-flight acquisition of the primary ONNX model
//! - Primary inference with a deterministic heuristic fallback
//! - Health checks and observability

pub mod error;
pub mod health;
pub mod model;
pub mod models;
pub mod observability;
pub mod predictor;

pub use error::{ModelError, NormalizeError, PredictError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use model::{ModelConfig, ModelInfo, ModelProvider, ProviderStatus};
pub use models::*;
pub use observability::{FreshnessMetrics, StructuredLogger};
pub use predictor::{ImageNormalizer, ImageSource, PredictionOrchestrator};
