//! Model acquisition without classification

use anyhow::Result;
use freshness_lib::ProviderStatus;
use std::path::PathBuf;
use std::time::Duration;

use super::predict::build_provider;

/// Download (if missing) and validate the model artifact
pub async fn fetch_model(
    model_path: PathBuf,
    model_url: Option<String>,
    timeout: Duration,
) -> Result<ProviderStatus> {
    let provider = build_provider(model_path, model_url, timeout)?;
    Ok(provider.reload().await)
}
