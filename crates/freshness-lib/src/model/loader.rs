//! Artifact loading

use super::download::compute_checksum;
use super::{ModelHandle, ModelInfo};
use crate::error::ModelError;
use crate::predictor::{NormalizerConfig, TractBackend};
use std::path::Path;

/// Turns an artifact on disk into a [`ModelHandle`]
///
/// Loading is blocking; the provider runs it on the blocking pool.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<ModelHandle, ModelError>;
}

/// Loads ONNX models with tract
#[derive(Debug, Clone)]
pub struct TractLoader {
    input_shape: [usize; 4],
}

impl Default for TractLoader {
    fn default() -> Self {
        Self::new(NormalizerConfig::default().input_shape())
    }
}

impl TractLoader {
    pub fn new(input_shape: [usize; 4]) -> Self {
        Self { input_shape }
    }
}

impl ModelLoader for TractLoader {
    fn load(&self, path: &Path) -> Result<ModelHandle, ModelError> {
        let bytes = std::fs::read(path).map_err(|e| {
            ModelError::Unavailable(format!("failed to read {}: {}", path.display(), e))
        })?;

        if bytes.is_empty() {
            return Err(ModelError::Corrupt {
                path: path.to_path_buf(),
                reason: "artifact is empty".to_string(),
            });
        }

        let backend =
            TractBackend::from_bytes(&bytes, self.input_shape).map_err(|e| ModelError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("{:#}", e),
            })?;

        let info = ModelInfo {
            path: path.to_path_buf(),
            size_bytes: bytes.len() as u64,
            checksum: compute_checksum(&bytes),
            input_shape: self.input_shape,
            loaded_at: chrono::Utc::now().timestamp(),
        };

        Ok(ModelHandle::new(Box::new(backend), info))
    }
}
