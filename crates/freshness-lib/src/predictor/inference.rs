//! ONNX inference using tract
//!
//! Provides pure-Rust inference for the freshness classifier. The model takes
//! a `[1, 128, 128, 3]` NHWC tensor and returns a 5-way softmax.

use super::Classifier;
use crate::error::PredictError;
use crate::model::ModelHandle;
use crate::models::{ImageTensor, PredictionSource, ProbabilityVector, NUM_CLASSES};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, warn};

/// Inference latency above which a warning is logged
const MAX_INFERENCE_MS: u128 = 250;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Something that can run a forward pass over an image batch
pub trait InferenceBackend: Send + Sync {
    /// NHWC shape the backend was built for
    fn input_shape(&self) -> [usize; 4];

    /// Raw output values for one batch
    fn run(&self, tensor: &ImageTensor) -> Result<Vec<f32>>;
}

/// tract-backed model, optimized for a fixed input shape
pub struct TractBackend {
    plan: TractModel,
    input_shape: [usize; 4],
}

impl TractBackend {
    /// Parse, validate and optimize an ONNX model
    pub fn from_bytes(model_bytes: &[u8], input_shape: [usize; 4]) -> Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .context("Failed to parse ONNX model")?
            .with_input_fact(0, f32::fact(input_shape).into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?;

        let output_fact = model.output_fact(0).context("Model has no output")?;
        if let Some(dims) = output_fact.shape.as_concrete() {
            if dims.last() != Some(&NUM_CLASSES) {
                anyhow::bail!(
                    "Model output shape {:?} does not end in {} classes",
                    dims,
                    NUM_CLASSES
                );
            }
        }

        let plan = model
            .into_runnable()
            .context("Failed to create runnable model")?;

        Ok(Self { plan, input_shape })
    }
}

impl InferenceBackend for TractBackend {
    fn input_shape(&self) -> [usize; 4] {
        self.input_shape
    }

    fn run(&self, tensor: &ImageTensor) -> Result<Vec<f32>> {
        let input = Tensor::from_shape(&tensor.shape(), tensor.data())?;
        let result = self.plan.run(tvec!(input.into()))?;
        let output = result.first().context("No output from model")?;
        let output_view = output.to_array_view::<f32>()?;
        Ok(output_view.iter().copied().collect())
    }
}

/// Runs the loaded model
pub struct PrimaryPredictor {
    handle: Arc<ModelHandle>,
}

impl PrimaryPredictor {
    pub fn new(handle: Arc<ModelHandle>) -> Self {
        Self { handle }
    }
}

impl Classifier for PrimaryPredictor {
    fn classify(&self, tensor: &ImageTensor) -> Result<ProbabilityVector, PredictError> {
        // Validate before handing anything to the backend
        let expected = self.handle.input_shape();
        if tensor.shape() != expected {
            return Err(PredictError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: tensor.shape().to_vec(),
            });
        }

        let start = Instant::now();
        let raw = self
            .handle
            .backend()
            .run(tensor)
            .map_err(|e| PredictError::Inference(format!("{:#}", e)))?;

        let elapsed = start.elapsed();
        if elapsed.as_millis() > MAX_INFERENCE_MS {
            warn!(elapsed_ms = elapsed.as_millis(), "Inference exceeded {}ms target", MAX_INFERENCE_MS);
        } else {
            debug!(elapsed_us = elapsed.as_micros(), "Inference completed");
        }

        ProbabilityVector::try_from_slice(&raw)
    }

    fn source(&self) -> PredictionSource {
        PredictionSource::Primary
    }
}
