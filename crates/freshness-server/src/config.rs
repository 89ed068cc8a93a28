//! Server configuration

use anyhow::{Context, Result};
use config::{builder::DefaultState, ConfigBuilder, Environment};
use freshness_lib::ModelConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
///
/// Read from `FRESHNESS_*` variables; the legacy `PORT`,
/// `FOOD_FRESHNESS_MODEL` and `FOOD_FRESHNESS_MODEL_URL` variables supply
/// the defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Name reported in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Port for the prediction, health and metrics API
    #[serde(default = "default_port")]
    pub port: u16,

    /// Where the model artifact lives (and is downloaded to)
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Remote artifact fetched when `model_path` is missing
    #[serde(default = "default_model_url")]
    pub model_url: Option<String>,

    /// Bound on the model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "freshness-server".to_string())
}

fn default_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(8080)
}

fn default_model_path() -> PathBuf {
    std::env::var("FOOD_FRESHNESS_MODEL")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("model.onnx"))
}

fn default_model_url() -> Option<String> {
    std::env::var("FOOD_FRESHNESS_MODEL_URL").ok()
}

fn default_download_timeout_secs() -> u64 {
    freshness_lib::model::DEFAULT_DOWNLOAD_TIMEOUT.as_secs()
}

impl ServerConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_builder(
            config::Config::builder()
                .add_source(Environment::with_prefix("FRESHNESS").try_parsing(true)),
        )
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config = builder.build().context("Failed to read configuration")?;
        let parsed: Self = config
            .try_deserialize()
            .context("Invalid server configuration")?;

        if parsed.download_timeout_secs == 0 {
            anyhow::bail!("download_timeout_secs must be greater than zero");
        }
        Ok(parsed)
    }

    pub fn model_config(&self) -> ModelConfig {
        let config = ModelConfig::new(&self.model_path);
        match &self.model_url {
            Some(url) => config.with_remote_url(url.clone()),
            None => config,
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn from_json(json: &str) -> Result<ServerConfig> {
        ServerConfig::from_builder(
            config::Config::builder().add_source(File::from_str(json, FileFormat::Json)),
        )
    }

    #[test]
    fn test_explicit_values() {
        let config = from_json(
            r#"{
                "port": 9000,
                "model_path": "/models/freshness.onnx",
                "model_url": "https://example.com/freshness.onnx",
                "download_timeout_secs": 5
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.download_timeout(), Duration::from_secs(5));

        let model = config.model_config();
        assert_eq!(model.local_path, PathBuf::from("/models/freshness.onnx"));
        assert_eq!(
            model.remote_url.as_deref(),
            Some("https://example.com/freshness.onnx")
        );
    }

    #[test]
    fn test_blank_url_means_no_download() {
        let config = from_json(r#"{ "model_url": "  " }"#).unwrap();
        assert!(config.model_config().remote_url.is_none());
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        assert!(from_json(r#"{ "download_timeout_secs": 0 }"#).is_err());
    }

    #[test]
    fn test_bad_port_is_rejected() {
        assert!(from_json(r#"{ "port": "not-a-port" }"#).is_err());
    }
}
