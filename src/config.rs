use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub checkpoints: CheckpointConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CheckpointConfig {
    /// SQLite database file holding durable checkpoint state.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Documents per batch handed to the indexing pipeline.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Full batches allowed per run; remaining source items are left for
    /// the next run. Unset means unbounded.
    #[serde(default)]
    pub max_batches: Option<usize>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_batches: None,
        }
    }
}

fn default_batch_size() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub directory: Option<DirectoryConnectorConfig>,
    pub messaging: Option<MessagingConnectorConfig>,
    pub export: Option<ExportConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryConnectorConfig {
    /// Root of the plain-text tree to walk.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MessagingConnectorConfig {
    /// Workspace host used to build message permalinks
    /// (e.g. `"acme.example.com"`).
    pub workspace: String,
    /// Channel-name allowlist. Unset means all visible channels; a name
    /// absent from the workspace fails the run loudly.
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    /// Base URL of the messaging API.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    "https://messaging.example.com/api".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConnectorConfig {
    /// Root of the exported archive (`channels.json` plus one directory
    /// per channel).
    pub path: PathBuf,
    /// Workspace host for permalinks, as in the live connector.
    pub workspace: String,
    #[serde(default)]
    pub channels: Option<Vec<String>>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }
    if config.ingest.max_batches == Some(0) {
        anyhow::bail!("ingest.max_batches must be > 0 when set");
    }
    if let Some(messaging) = &config.connectors.messaging {
        if messaging.workspace.is_empty() {
            anyhow::bail!("connectors.messaging.workspace must not be empty");
        }
    }

    Ok(config)
}
