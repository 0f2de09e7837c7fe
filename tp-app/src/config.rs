//! TaskPilot configuration loader.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct TaskPilotConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

pub fn default_system_prompt() -> String {
    "You are TaskPilot, an assistant for a to-do list application. You help the user \
     organize, create, and complete tasks. Use the provided functions for anything that \
     touches the task list; never invent task ids."
        .to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub openai_api_key: Option<String>,
    /// Override for OpenAI-compatible gateways.
    pub openai_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_data_dir_raw")]
    pub data_dir: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
    #[serde(default = "default_llm_timeout_seconds")]
    pub llm_timeout_seconds: u64,
    #[serde(default = "default_tool_loops_max")]
    pub tool_loops_max: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir_raw(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
            llm_timeout_seconds: default_llm_timeout_seconds(),
            tool_loops_max: default_tool_loops_max(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_data_dir_raw() -> String {
    "~/.taskpilot/data".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    64
}

fn default_llm_timeout_seconds() -> u64 {
    45
}

fn default_tool_loops_max() -> usize {
    4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

impl TaskPilotConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let (cfg, _) = Self::load_with_path(path).await?;
        Ok(cfg)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg: TaskPilotConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok((cfg, path))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TASKPILOT_MODEL") {
            if !v.trim().is_empty() {
                self.general.model = v;
            }
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            if !v.trim().is_empty() {
                self.keys.openai_api_key = Some(v);
            }
        }
        if let Ok(v) = std::env::var("OPENAI_BASE_URL") {
            if !v.trim().is_empty() {
                self.keys.openai_base_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("TASKPILOT_BIND_ADDR") {
            if !v.trim().is_empty() {
                self.runtime.bind_addr = v;
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.general.model.trim().is_empty() {
            return Err(anyhow::anyhow!("general.model is required"));
        }
        if self.runtime.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "runtime.bind_addr is not a valid socket address: {}",
                self.runtime.bind_addr
            ));
        }
        if self.runtime.tool_loops_max == 0 {
            return Err(anyhow::anyhow!("runtime.tool_loops_max must be > 0"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> std::net::SocketAddr {
        // Checked in validate().
        self.runtime
            .bind_addr
            .parse()
            .expect("bind_addr validated at load")
    }

    pub fn api_key(&self) -> anyhow::Result<String> {
        self.keys
            .openai_api_key
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("keys.openai_api_key (or OPENAI_API_KEY) is required"))
    }

    pub fn data_dir_path(&self) -> anyhow::Result<PathBuf> {
        expand_home(&self.runtime.data_dir)
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".taskpilot").join("config.toml")
}

pub fn expand_home(path: &str) -> anyhow::Result<PathBuf> {
    let trimmed = path.trim().to_string();
    if !trimmed.starts_with("~/") {
        return Ok(PathBuf::from(trimmed));
    }
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(trimmed.replacen('~', &home, 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg: TaskPilotConfig = toml::from_str(
            r#"
[general]
model = "gpt-4o-mini"
"#,
        )
        .expect("parse");
        assert_eq!(cfg.runtime.bind_addr, "127.0.0.1:8080");
        assert_eq!(cfg.runtime.tool_loops_max, 4);
        assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
        cfg.validate().expect("valid");
    }

    #[test]
    fn bad_bind_addr_fails_validation() {
        let cfg: TaskPilotConfig = toml::from_str(
            r#"
[general]
model = "gpt-4o-mini"

[runtime]
bind_addr = "not-an-addr"
"#,
        )
        .expect("parse");
        assert!(cfg.validate().is_err());
    }
}
