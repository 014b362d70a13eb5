use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

use crate::mirror::{SnapshotMerge, DEFAULT_CAPACITY};
use crate::schema::GraphStyle;

const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_TABLE: &str = "ai_executions";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Deserialize)]
pub struct ConsoleConfig {
    pub backend: BackendConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub graph: GraphStyle,
}

#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub snapshot_merge: SnapshotMerge,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            table: default_table(),
            snapshot_merge: SnapshotMerge::default(),
        }
    }
}

impl BackendConfig {
    /// An inline `api_key` wins over `api_key_env`.
    pub fn resolve_api_key(&self) -> anyhow::Result<Option<String>> {
        if let Some(key) = self.api_key.as_ref().filter(|key| !key.trim().is_empty()) {
            return Ok(Some(key.trim().to_string()));
        }
        let Some(var) = self.api_key_env.as_deref() else {
            return Ok(None);
        };
        let value = std::env::var(var)
            .with_context(|| format!("api_key_env {var} is not set"))?;
        let value = value.trim();
        if value.is_empty() {
            anyhow::bail!("api_key_env {var} is empty");
        }
        Ok(Some(value.to_string()))
    }
}

pub fn load_console_config(path: &Path) -> anyhow::Result<ConsoleConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_console_config(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

pub fn parse_console_config(raw: &str) -> anyhow::Result<ConsoleConfig> {
    let config: ConsoleConfig = toml::from_str(raw)?;
    let base_url = config.backend.base_url.trim();
    if base_url.is_empty() {
        anyhow::bail!("backend.base_url cannot be empty");
    }
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        anyhow::bail!("backend.base_url must be http or https: {base_url}");
    }
    if config.monitor.capacity == 0 {
        anyhow::bail!("monitor.capacity must be at least 1");
    }
    if config.monitor.table.trim().is_empty() {
        anyhow::bail!("monitor.table cannot be empty");
    }
    if config.backend.request_timeout_ms == 0 {
        anyhow::bail!("backend.request_timeout_ms must be positive");
    }
    Ok(config)
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}
