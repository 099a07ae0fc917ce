use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::path::{FsPath, FsPathBuf};

/// Where the local tree lands in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemoteRoot {
    /// A well-known folder, looked up by name anywhere in the store.
    Name(String),
    /// A folder given by its id.
    Id(String),
}

fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub local_dir: FsPathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteRoot>,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Config {
    pub async fn load_from_file(path: &FsPath) -> anyhow::Result<Self> {
        let config_json = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read config from {path}"))?;
        let config_json = std::str::from_utf8(&config_json)?;
        Self::from_json(config_json).with_context(|| format!("Invalid config in {path}"))
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let mut config: Config = serde_json::from_str(json)?;
        if config.local_dir.as_str().is_empty() {
            anyhow::bail!("local_dir must not be empty");
        }
        config.concurrency = config.concurrency.max(1);
        Ok(config)
    }
}
