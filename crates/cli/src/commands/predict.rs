//! Local classification

use anyhow::{Context, Result};
use freshness_lib::{
    ImageSource, ModelConfig, ModelProvider, PredictionOrchestrator, PredictionResult,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Classify `image` in-process, downloading the model first if configured
pub async fn predict_image(
    image: PathBuf,
    model_path: PathBuf,
    model_url: Option<String>,
    timeout: Duration,
) -> Result<PredictionResult> {
    let provider = build_provider(model_path, model_url, timeout)?;
    let orchestrator = PredictionOrchestrator::new(Arc::new(provider));
    Ok(orchestrator.predict(ImageSource::path(image)).await)
}

pub(crate) fn build_provider(
    model_path: PathBuf,
    model_url: Option<String>,
    timeout: Duration,
) -> Result<ModelProvider> {
    let mut config = ModelConfig::new(model_path);
    if let Some(url) = model_url {
        config = config.with_remote_url(url);
    }

    ModelProvider::new(config)
        .and_then(|provider| provider.with_download_timeout(timeout))
        .context("Failed to create model provider")
}

#[cfg(test)]
mod tests {
    use super::*;
    use freshness_lib::{ClassLabel, PredictionSource};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_model_falls_back() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("black.png");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([0, 0, 0])))
            .save_with_format(&image, ImageFormat::Png)
            .unwrap();

        let result = predict_image(
            image,
            dir.path().join("model.onnx"),
            None,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(result.label, Some(ClassLabel::Rotten));
        assert_eq!(result.source, Some(PredictionSource::Fallback));
    }

    #[tokio::test]
    async fn test_missing_image_is_terminal() {
        let dir = TempDir::new().unwrap();
        let result = predict_image(
            dir.path().join("nope.jpg"),
            dir.path().join("model.onnx"),
            None,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert!(result.is_terminal_error());
    }
}
