//! Loaded model handle

use crate::predictor::InferenceBackend;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Metadata about the loaded artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// SHA-256 of the artifact, hex encoded
    pub checksum: String,
    pub input_shape: [usize; 4],
    pub loaded_at: i64,
}

/// Opaque reference to a ready-to-run model
///
/// Owned by the [`ModelProvider`](super::ModelProvider) and shared read-only
/// with predictions.
pub struct ModelHandle {
    backend: Box<dyn InferenceBackend>,
    info: ModelInfo,
}

impl ModelHandle {
    pub fn new(backend: Box<dyn InferenceBackend>, info: ModelInfo) -> Self {
        Self { backend, info }
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    /// Input shape declared by the backend
    pub fn input_shape(&self) -> [usize; 4] {
        self.backend.input_shape()
    }

    pub(crate) fn backend(&self) -> &dyn InferenceBackend {
        self.backend.as_ref()
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}
