//! Classification through a running server

use anyhow::Result;
use freshness_lib::PredictionResult;
use std::path::Path;

use crate::client::ApiClient;

/// Upload `image` to the server at `api_url`
pub async fn predict_remote(api_url: &str, image: &Path) -> Result<PredictionResult> {
    let client = ApiClient::new(api_url)?;
    client.predict(image).await
}
