//! API client for a running freshness server

use anyhow::{Context, Result};
use freshness_lib::PredictionResult;
use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use std::path::Path;
use url::Url;

/// Error body returned for rejected requests
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// API client for the freshness server
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Upload an image to `POST /predict`
    ///
    /// Rejected uploads come back as a terminal-error result; transport
    /// failures are errors.
    pub async fn predict(&self, image: &Path) -> Result<PredictionResult> {
        let data = match tokio::fs::read(image).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PredictionResult::failed(format!(
                    "image not found: {}",
                    image.display()
                )));
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", image.display()))
            }
        };

        let file_name = image
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("image")
            .to_string();
        let form = multipart::Form::new().part("image", multipart::Part::bytes(data).file_name(file_name));

        let url = self.base_url.join("predict").context("Invalid path")?;
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .context("Failed to send request")?;

        match response.status() {
            StatusCode::OK | StatusCode::UNPROCESSABLE_ENTITY => {
                response.json().await.context("Failed to parse response")
            }
            StatusCode::BAD_REQUEST => {
                let body: ErrorBody = response.json().await.context("Failed to parse response")?;
                Ok(PredictionResult::failed(body.error))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("API error ({}): {}", status, body);
            }
        }
    }
}
