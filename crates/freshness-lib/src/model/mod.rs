//! Model acquisition and loading
//!
//! This module provides:
//! - Streamed download of the model artifact from a remote URL
//! - Loading and structural validation of ONNX artifacts
//! - A lazily-resolved, single-flight model provider

mod download;
mod handle;
mod loader;
mod provider;

#[cfg(test)]
pub(crate) mod testing;

pub use download::{
    compute_checksum, DownloadedArtifact, ModelDownloader, DEFAULT_DOWNLOAD_TIMEOUT,
    MAX_MODEL_BYTES,
};
pub use handle::{ModelHandle, ModelInfo};
pub use loader::{ModelLoader, TractLoader};
pub use provider::{ModelConfig, ModelProvider, ProviderStatus};
