//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Model artifact used when nothing else is configured
pub const DEFAULT_MODEL_PATH: &str = "model.onnx";

/// Server used by `remote` when nothing else is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// User configuration stored in `~/.config/freshness/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default model artifact path
    pub model_path: Option<PathBuf>,
    /// Default model download URL
    pub model_url: Option<String>,
    /// Default server for `remote`
    pub api_url: Option<String>,
}

impl Config {
    /// Load configuration from the user config file, if any
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Flag or env value first, then the config file, then `model.onnx`
    pub fn model_path(&self, flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| self.model_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH))
    }

    pub fn model_url(&self, flag: Option<String>) -> Option<String> {
        flag.or_else(|| self.model_url.clone())
            .filter(|url| !url.trim().is_empty())
    }

    pub fn api_url(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Get the configuration file path
    fn config_path() -> Option<PathBuf> {
        let home = dirs_next::home_dir()?;
        Some(home.join(".config").join("freshness").join("config.json"))
    }
}
