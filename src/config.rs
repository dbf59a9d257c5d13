//! TOML configuration parsing.
//!
//! ```toml
//! [model]
//! provider = "gemini"
//! model = "gemini-2.5-pro-exp-03-25"
//! api_key_env = "GOOGLE_API_KEY"
//!
//! [upload]
//! max_entry_bytes = 10485760
//!
//! [server]
//! bind = "127.0.0.1:9595"
//! ```
//!
//! Every section is optional; missing keys fall back to the defaults below.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// `gemini` for the remote API, `echo` for the offline scripted provider.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-2.5-pro-exp-03-25".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_connect_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    /// Upper bound on the decompressed size of a single archive entry.
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_entry_bytes: default_max_entry_bytes(),
        }
    }
}

fn default_max_entry_bytes() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:9595".to_string()
}

impl Config {
    /// Configuration used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Loads `path` if it exists, otherwise returns [`Config::minimal`].
pub fn load_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

fn validate(config: &Config) -> Result<()> {
    match config.model.provider.as_str() {
        "gemini" | "echo" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be gemini or echo.",
            other
        ),
    }

    if config.model.model.trim().is_empty() {
        anyhow::bail!("model.model must not be empty");
    }

    if config.upload.max_entry_bytes == 0 {
        anyhow::bail!("upload.max_entry_bytes must be > 0");
    }

    Ok(())
}
