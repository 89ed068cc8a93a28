//! Lazy, single-flight model provider
//!
//! Resolves the primary model at most once per process: load the local
//! artifact, otherwise try one download, otherwise report the model as
//! unavailable. The outcome, success or failure, is cached until `reload()`.

use super::{ModelDownloader, ModelHandle, ModelInfo, ModelLoader, TractLoader, DEFAULT_DOWNLOAD_TIMEOUT};
use crate::error::ModelError;
use crate::observability::FreshnessMetrics;
use crate::predictor::NormalizerConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Where the primary model lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path the artifact is loaded from (and downloaded to)
    pub local_path: PathBuf,
    /// Optional URL fetched when nothing exists at `local_path`
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Tensor geometry the model is built for; images are normalized to it
    #[serde(skip)]
    pub input: NormalizerConfig,
}

impl ModelConfig {
    pub fn new(local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_url: None,
            input: NormalizerConfig::default(),
        }
    }

    pub fn with_input(mut self, input: NormalizerConfig) -> Self {
        self.input = input;
        self
    }

    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.remote_url = if url.trim().is_empty() { None } else { Some(url) };
        self
    }
}

/// Cached resolution outcome
enum LoadState {
    Unloaded,
    Ready(Arc<ModelHandle>),
    Failed(ModelError),
}

/// Provider state as reported to health checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ProviderStatus {
    /// Nothing attempted yet
    Unloaded,
    /// A resolution is in flight
    Loading,
    Loaded { model: ModelInfo },
    Unavailable { reason: String },
    Corrupt { reason: String },
}

impl ProviderStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ProviderStatus::Loaded { .. })
    }
}

/// Raises the loading flag for the lifetime of one resolution
///
/// Lowered on drop, so a cancelled resolution does not leave the provider
/// reporting `Loading` forever.
struct LoadingFlag<'a>(&'a AtomicBool);

impl<'a> LoadingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for LoadingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the primary model handle
pub struct ModelProvider {
    config: ModelConfig,
    downloader: ModelDownloader,
    loader: Arc<dyn ModelLoader>,
    /// Cached outcome; only written by the holder of `resolving`
    state: RwLock<LoadState>,
    /// Serializes resolutions so concurrent first callers share one
    resolving: Mutex<()>,
    loading: AtomicBool,
    resolutions: AtomicU64,
    metrics: FreshnessMetrics,
}

impl ModelProvider {
    /// Create a provider with the default download timeout and a tract
    /// loader built for `config.input`
    pub fn new(config: ModelConfig) -> Result<Self> {
        let loader = TractLoader::new(config.input.input_shape());
        Ok(Self {
            config,
            downloader: ModelDownloader::new(DEFAULT_DOWNLOAD_TIMEOUT)?,
            loader: Arc::new(loader),
            state: RwLock::new(LoadState::Unloaded),
            resolving: Mutex::new(()),
            loading: AtomicBool::new(false),
            resolutions: AtomicU64::new(0),
            metrics: FreshnessMetrics::new(),
        })
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.downloader = ModelDownloader::new(timeout)?;
        Ok(self)
    }

    pub fn with_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Number of resolutions performed so far (one per load or reload)
    pub fn resolutions(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }

    /// Get the model, resolving it on first use
    ///
    /// Concurrent callers during the first resolution wait for and share its
    /// outcome. A failed resolution is not retried until [`Self::reload`].
    pub async fn handle(&self) -> Result<Arc<ModelHandle>, ModelError> {
        if let Some(outcome) = self.cached() {
            return outcome;
        }

        let _resolving = self.resolving.lock().await;
        // Another caller may have resolved while we waited
        if let Some(outcome) = self.cached() {
            return outcome;
        }

        let _loading = LoadingFlag::raise(&self.loading);
        let outcome = self.resolve().await;
        self.store(&outcome);
        outcome
    }

    /// Discard the cached outcome and resolve again
    pub async fn reload(&self) -> ProviderStatus {
        let _resolving = self.resolving.lock().await;
        info!(path = %self.config.local_path.display(), "Reloading model");

        let _loading = LoadingFlag::raise(&self.loading);
        let outcome = self.resolve().await;
        self.store(&outcome);
        Self::describe(&self.read_state())
    }

    /// Current state without waiting for an in-flight resolution
    ///
    /// `Loading` only while a resolution is running; cached reads never
    /// change what is reported.
    pub fn status(&self) -> ProviderStatus {
        if self.loading.load(Ordering::Acquire) {
            return ProviderStatus::Loading;
        }
        Self::describe(&self.read_state())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, LoadState> {
        // The state is replaced wholesale, so a poisoned lock still holds a valid value
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cached(&self) -> Option<Result<Arc<ModelHandle>, ModelError>> {
        match &*self.read_state() {
            LoadState::Unloaded => None,
            LoadState::Ready(handle) => Some(Ok(handle.clone())),
            LoadState::Failed(e) => Some(Err(e.clone())),
        }
    }

    fn store(&self, outcome: &Result<Arc<ModelHandle>, ModelError>) {
        let next = match outcome {
            Ok(handle) => LoadState::Ready(handle.clone()),
            Err(e) => LoadState::Failed(e.clone()),
        };
        *self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
    }

    fn describe(state: &LoadState) -> ProviderStatus {
        match state {
            LoadState::Unloaded => ProviderStatus::Unloaded,
            LoadState::Ready(handle) => ProviderStatus::Loaded {
                model: handle.info().clone(),
            },
            LoadState::Failed(e @ ModelError::Unavailable(_)) => ProviderStatus::Unavailable {
                reason: e.to_string(),
            },
            LoadState::Failed(e @ ModelError::Corrupt { .. }) => ProviderStatus::Corrupt {
                reason: e.to_string(),
            },
        }
    }

    async fn resolve(&self) -> Result<Arc<ModelHandle>, ModelError> {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        let path = self.config.local_path.clone();

        if !artifact_exists(&path).await {
            match &self.config.remote_url {
                Some(url) => {
                    if let Err(e) = self.downloader.download(url, &path).await {
                        // Keep going; a stale local copy may still be loadable
                        let reason = format!("{:#}", e);
                        self.metrics.inc_download_failures();
                        warn!(url = %url, error = %reason, "Model download failed");
                    }
                }
                None => debug!(path = %path.display(), "No model artifact and no remote URL configured"),
            }
        }

        if !artifact_exists(&path).await {
            let err = ModelError::Unavailable(format!("no model artifact at {}", path.display()));
            warn!(error = %err, "Primary model unavailable, predictions will use the heuristic fallback");
            self.metrics.set_model_loaded(None);
            return Err(err);
        }

        let loader = self.loader.clone();
        let load_path = path.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&load_path))
            .await
            .map_err(|e| ModelError::Unavailable(format!("model load task failed: {}", e)))?;

        match loaded {
            Ok(handle) => {
                let info = handle.info();
                info!(
                    path = %info.path.display(),
                    size = info.size_bytes,
                    checksum = %info.checksum,
                    "Primary model loaded"
                );
                self.metrics.set_model_loaded(Some(&info.checksum));
                Ok(Arc::new(handle))
            }
            Err(e) => {
                if e.is_corrupt() {
                    error!(error = %e, "Model artifact failed validation");
                } else {
                    warn!(error = %e, "Failed to load model artifact");
                }
                self.metrics.set_model_loaded(None);
                Err(e)
            }
        }
    }
}

async fn artifact_exists(path: &std::path::Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::CountingLoader;
    use std::time::Instant;
    use tempfile::TempDir;

    fn provider_for(dir: &TempDir, loader: Arc<CountingLoader>) -> ModelProvider {
        ModelProvider::new(ModelConfig::new(dir.path().join("model.onnx")))
            .unwrap()
            .with_loader(loader)
    }

    #[tokio::test]
    async fn test_no_artifact_no_url_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let loader = Arc::new(CountingLoader::succeeding());
        let provider = provider_for(&dir, loader.clone());

        let err = provider.handle().await.unwrap_err();
        assert!(matches!(err, ModelError::Unavailable(_)));
        assert_eq!(loader.loads(), 0);
        assert!(matches!(provider.status(), ProviderStatus::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_existing_artifact_loads_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"weights").unwrap();
        let loader = Arc::new(CountingLoader::succeeding());
        let provider = provider_for(&dir, loader.clone());

        let first = provider.handle().await.unwrap();
        let second = provider.handle().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.loads(), 1);
        assert!(provider.status().is_loaded());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_load() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"weights").unwrap();
        let loader = Arc::new(CountingLoader::succeeding().with_delay(Duration::from_millis(100)));
        let provider = Arc::new(provider_for(&dir, loader.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.handle().await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(loader.loads(), 1);
        assert_eq!(provider.resolutions(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_cached_until_reload() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"weights").unwrap();
        let loader = Arc::new(CountingLoader::corrupt());
        let provider = provider_for(&dir, loader.clone());

        assert!(provider.handle().await.unwrap_err().is_corrupt());
        assert!(provider.handle().await.unwrap_err().is_corrupt());
        assert_eq!(loader.loads(), 1);
        assert!(matches!(provider.status(), ProviderStatus::Corrupt { .. }));

        let status = provider.reload().await;
        assert!(matches!(status, ProviderStatus::Corrupt { .. }));
        assert_eq!(loader.loads(), 2);
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_artifact() {
        let dir = TempDir::new().unwrap();
        let loader = Arc::new(CountingLoader::succeeding());
        let provider = provider_for(&dir, loader.clone());

        assert!(provider.handle().await.is_err());

        std::fs::write(dir.path().join("model.onnx"), b"weights").unwrap();
        assert!(provider.reload().await.is_loaded());
        assert!(provider.handle().await.is_ok());
        assert_eq!(loader.loads(), 1);
    }

    #[tokio::test]
    async fn test_downloads_missing_artifact() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/model.onnx")
            .with_status(200)
            .with_body("weights")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models").join("model.onnx");
        let loader = Arc::new(CountingLoader::succeeding());
        let provider = ModelProvider::new(
            ModelConfig::new(&path).with_remote_url(format!("{}/model.onnx", server.url())),
        )
        .unwrap()
        .with_loader(loader.clone());

        assert!(provider.handle().await.is_ok());
        mock.assert_async().await;
        assert_eq!(std::fs::read(&path).unwrap(), b"weights");
        assert_eq!(loader.loads(), 1);
    }

    #[tokio::test]
    async fn test_existing_artifact_skips_download() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/model.onnx")
            .expect(0)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.onnx");
        std::fs::write(&path, b"local weights").unwrap();
        let provider = ModelProvider::new(
            ModelConfig::new(&path).with_remote_url(format!("{}/model.onnx", server.url())),
        )
        .unwrap()
        .with_loader(Arc::new(CountingLoader::succeeding()));

        assert!(provider.handle().await.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_url_resolves_unavailable_within_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let dir = TempDir::new().unwrap();
        let loader = Arc::new(CountingLoader::succeeding());
        let provider = ModelProvider::new(
            ModelConfig::new(dir.path().join("model.onnx"))
                .with_remote_url(format!("http://{}/model.onnx", addr)),
        )
        .unwrap()
        .with_download_timeout(Duration::from_millis(300))
        .unwrap()
        .with_loader(loader.clone());

        let start = Instant::now();
        let err = provider.handle().await.unwrap_err();

        assert!(matches!(err, ModelError::Unavailable(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(loader.loads(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_real_artifact_with_tract_loader() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.onnx");
        std::fs::write(&path, b"\x08\x07garbage").unwrap();

        let provider = ModelProvider::new(ModelConfig::new(&path)).unwrap();
        assert!(provider.handle().await.unwrap_err().is_corrupt());
    }

    #[tokio::test]
    async fn test_status_is_loading_only_while_resolving() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"weights").unwrap();
        let loader = Arc::new(CountingLoader::succeeding().with_delay(Duration::from_millis(300)));
        let provider = Arc::new(provider_for(&dir, loader));

        assert_eq!(provider.status(), ProviderStatus::Unloaded);
        let pending = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.handle().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provider.status(), ProviderStatus::Loading);

        assert!(pending.await.unwrap().is_ok());
        assert!(provider.status().is_loaded());
    }

    #[tokio::test]
    async fn test_cached_reads_keep_status_loaded() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"weights").unwrap();
        let provider = Arc::new(provider_for(&dir, Arc::new(CountingLoader::succeeding())));
        provider.handle().await.unwrap();

        // A reader in the middle of a cached lookup
        let reader = provider.read_state();
        assert!(provider.status().is_loaded());
        drop(reader);

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move {
                    for _ in 0..200 {
                        provider.handle().await.unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for _ in 0..200 {
            assert!(provider.status().is_loaded());
            tokio::task::yield_now().await;
        }
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(provider.resolutions(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_resolution_clears_loading() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"weights").unwrap();
        let loader = Arc::new(CountingLoader::succeeding().with_delay(Duration::from_millis(300)));
        let provider = Arc::new(provider_for(&dir, loader));

        let pending = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.handle().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(provider.status(), ProviderStatus::Loading);

        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());
        assert_eq!(provider.status(), ProviderStatus::Unloaded);
    }

    #[test]
    fn test_input_geometry_drives_tract_loader() {
        let gray = NormalizerConfig {
            height: 8,
            width: 8,
            channels: 1,
        };
        let config = ModelConfig::new("model.onnx").with_input(gray);
        assert_eq!(config.input.input_shape(), [1, 8, 8, 1]);
        assert_eq!(ModelConfig::new("model.onnx").input, NormalizerConfig::default());
    }

    #[tokio::test]
    async fn test_single_channel_onnx_model_loads_with_matching_input() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.onnx");
        crate::model::testing::write_onnx_classifier(&path, [1, 8, 8, 1], &[0.0; 5]);
        let gray = NormalizerConfig {
            height: 8,
            width: 8,
            channels: 1,
        };

        let provider = ModelProvider::new(ModelConfig::new(&path).with_input(gray)).unwrap();
        let handle = provider.handle().await.unwrap();
        assert_eq!(handle.input_shape(), [1, 8, 8, 1]);

        // The same artifact does not validate against the default RGB geometry
        let rgb = ModelProvider::new(ModelConfig::new(&path)).unwrap();
        assert!(rgb.handle().await.unwrap_err().is_corrupt());
    }

    #[test]
    fn test_blank_remote_url_is_ignored() {
        let config = ModelConfig::new("model.onnx").with_remote_url("  ");
        assert_eq!(config.remote_url, None);
    }
}
