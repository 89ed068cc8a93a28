//! Model download client
//!
//! Streams the model artifact from a remote URL into the configured path.
//! The body is written to a temporary sibling file, synced, then renamed into
//! place so a partial download never shadows a usable artifact.

use anyhow::{Context, Result};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

/// Default bound on a whole download, connect included
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest artifact accepted (512 MiB)
pub const MAX_MODEL_BYTES: u64 = 512 * 1024 * 1024;

/// Upper bound on the TCP/TLS connect phase
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A model artifact that landed on disk
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub checksum: String,
}

/// HTTP downloader for model artifacts
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    client: Client,
    timeout: Duration,
    max_model_size: u64,
}

impl ModelDownloader {
    /// Create a downloader whose every request is bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(MAX_CONNECT_TIMEOUT))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            timeout,
            max_model_size: MAX_MODEL_BYTES,
        })
    }

    pub fn with_max_model_size(mut self, max_model_size: u64) -> Self {
        self.max_model_size = max_model_size;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Download `url` into `dest`, creating parent directories as needed
    pub async fn download(&self, url: &str, dest: &Path) -> Result<DownloadedArtifact> {
        let url = Url::parse(url).with_context(|| format!("Invalid model URL {:?}", url))?;

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create model directory {:?}", parent))?;
        }

        let temp_path = dest.with_extension("tmp");
        debug!(url = %url, path = %dest.display(), "Downloading model");

        let outcome = tokio::time::timeout(self.timeout, self.fetch(&url, &temp_path)).await;
        let (size_bytes, checksum) = match outcome {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                remove_partial(&temp_path).await;
                return Err(e);
            }
            Err(_) => {
                remove_partial(&temp_path).await;
                anyhow::bail!("Model download timed out after {:?}", self.timeout);
            }
        };

        tokio::fs::rename(&temp_path, dest)
            .await
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, dest))?;

        info!(
            url = %url,
            path = %dest.display(),
            size = size_bytes,
            checksum = %checksum,
            "Model downloaded"
        );

        Ok(DownloadedArtifact {
            path: dest.to_path_buf(),
            size_bytes,
            checksum,
        })
    }

    /// Stream the body into `temp_path`, returning its size and checksum
    async fn fetch(&self, url: &Url, temp_path: &Path) -> Result<(u64, String)> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .context("Failed to request model")?
            .error_for_status()
            .context("Model server returned an error")?;

        if let Some(length) = response.content_length() {
            if length > self.max_model_size {
                anyhow::bail!(
                    "Model size {} exceeds maximum {}",
                    length,
                    self.max_model_size
                );
            }
        }

        let mut file = tokio::fs::File::create(temp_path)
            .await
            .with_context(|| format!("Failed to create temp model file {:?}", temp_path))?;
        let mut hasher = Sha256::new();
        let mut written: u64 = 0;

        while let Some(chunk) = response.chunk().await.context("Failed to read model body")? {
            written += chunk.len() as u64;
            if written > self.max_model_size {
                anyhow::bail!("Model size exceeds maximum {}", self.max_model_size);
            }
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .context("Failed to write model weights")?;
        }

        file.sync_all().await.context("Failed to sync model file")?;

        Ok((written, hex::encode(hasher.finalize())))
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial model file");
        }
    }
}

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn test_compute_checksum() {
        let checksum = compute_checksum(b"test model weights");
        assert_eq!(checksum.len(), 64); // SHA256 hex is 64 chars
        assert_eq!(checksum, compute_checksum(b"test model weights"));
        assert_ne!(checksum, compute_checksum(b"other weights"));
    }

    #[tokio::test]
    async fn test_download_writes_artifact() {
        let mut server = mockito::Server::new_async().await;
        let body = b"onnx model bytes".to_vec();
        let mock = server
            .mock("GET", "/models/freshness.onnx")
            .with_status(200)
            .with_body(&body)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("nested").join("dir").join("model.onnx");
        let downloader = ModelDownloader::new(Duration::from_secs(5)).unwrap();

        let artifact = downloader
            .download(&format!("{}/models/freshness.onnx", server.url()), &dest)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(artifact.size_bytes, body.len() as u64);
        assert_eq!(artifact.checksum, compute_checksum(&body));
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        assert!(!dest.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_http_error_leaves_nothing_behind() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.onnx")
            .with_status(404)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("model.onnx");
        let downloader = ModelDownloader::new(Duration::from_secs(5)).unwrap();

        let result = downloader
            .download(&format!("{}/missing.onnx", server.url()), &dest)
            .await;

        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(!dest.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/big.onnx")
            .with_status(200)
            .with_body(vec![0u8; 4096])
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("model.onnx");
        let downloader = ModelDownloader::new(Duration::from_secs(5))
            .unwrap()
            .with_max_model_size(1024);

        let result = downloader
            .download(&format!("{}/big.onnx", server.url()), &dest)
            .await;
        assert!(result.is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let dir = TempDir::new().unwrap();
        let downloader = ModelDownloader::new(Duration::from_secs(1)).unwrap();
        let result = downloader
            .download("not a url", &dir.path().join("model.onnx"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unresponsive_server_times_out() {
        // Accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("model.onnx");
        let downloader = ModelDownloader::new(Duration::from_millis(300)).unwrap();

        let start = Instant::now();
        let result = downloader
            .download(&format!("http://{}/model.onnx", addr), &dest)
            .await;

        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!dest.exists());
    }
}
