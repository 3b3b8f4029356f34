use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub backend_prefix: Option<String>,

    // Feature configs
    pub backend: Option<BackendConfig>,
    pub exchange: Option<ExchangeConfig>,
    pub eventd: Option<EventdConfig>,
}

/// Ganeti RAPI endpoint settings.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_sec: Option<u64>,
}

/// Message broker settings.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ExchangeConfig {
    pub url: Option<String>,
    pub vhost: Option<String>,
    pub name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_sec: Option<u64>,
    pub reconnect_delay_sec: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EventdConfig {
    pub queue_dir: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
