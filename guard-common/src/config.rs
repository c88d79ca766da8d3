//! Layered configuration: CLI flags (handled by the caller via `clap`)
//! override environment variables, which override an optional
//! `~/.guard/config.json` on disk. This module only handles the
//! file layer; env/flag layering happens in `guard-cli`'s clap structs
//! via `#[arg(env = "...")]`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct FileConfig {
    pub gitlab_token: Option<String>,
    pub datadog_api_key: Option<String>,
    pub default_batch_id: Option<String>,
}

pub fn config_path(path: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = path {
        Ok(PathBuf::from(path))
    } else if let Some(path) = std::env::var_os("GUARD_CONFIG") {
        Ok(PathBuf::from(path))
    } else {
        match std::env::home_dir() {
            Some(dir) => Ok(dir.join(".guard/config.json")),
            None => Err(anyhow::anyhow!(
                "failed to determine home directory for config lookup"
            )),
        }
    }
}

pub async fn load_config(path: Option<&str>) -> Result<FileConfig> {
    let config_path = config_path(path)?;
    let contents = match tokio::fs::read_to_string(&config_path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileConfig::default()),
        Err(e) => return Err(e).context("failed to read config file"),
    };
    serde_json::from_str(&contents).context("failed to parse config file as JSON")
}

pub async fn write_config(path: Option<&str>, config: &FileConfig) -> Result<()> {
    let config_path = config_path(path)?;
    let contents =
        serde_json::to_string_pretty(config).context("failed to serialize config to JSON")?;
    if let Some(parent) = config_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("failed to create config directory")?;
    }
    tokio::fs::write(&config_path, contents)
        .await
        .context("failed to write config file")?;
    Ok(())
}
