//! Configuration management for avopsd.
//!
//! Loads settings from /etc/avops/config.toml or uses defaults, then applies
//! environment overrides (OLLAMA_URL, OLLAMA_MODEL, AVOPS_DATABASE_PATH,
//! AVOPS_BIND_ADDR).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/avops/config.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/avops/config.toml";

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Owner recorded on runs when a request carries no X-User-Id header
    #[serde(default = "default_user_id")]
    pub default_user_id: i64,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_user_id() -> i64 {
    1
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            default_user_id: default_user_id(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file shared by telemetry, runs and the knowledge index
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/avops/avops.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Model endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the Ollama service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sampling temperature, kept low for repeatable JSON
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.1".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_temperature() -> f32 {
    0.2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Knowledge retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum snippets passed to the model
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    avops_common::DEFAULT_TOP_K
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

/// Full daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl Config {
    /// Load config from an explicit path, else the standard locations, else defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load_from_path(Path::new(CONFIG_PATH))
                .or_else(|_| Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH)))
                .unwrap_or_else(|e| {
                    warn!("Config not found, using defaults: {}", e);
                    Config::default()
                }),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config from specific path
    fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("OLLAMA_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("OLLAMA_MODEL") {
            self.llm.model = model;
        }
        if let Some(path) = lookup("AVOPS_DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("AVOPS_BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        self.llm.base_url = self.llm.base_url.trim_end_matches('/').to_string();
    }

    /// Save default config to path (for init)
    pub fn save_default(path: &Path) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        info!("Wrote default config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.llm.timeout_secs, 60);
        assert!((config.llm.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.server.default_user_id, 1);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [llm]
            model = "qwen2.5:7b-instruct"

            [retrieval]
            top_k = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.model, "qwen2.5:7b-instruct");
        assert_eq!(config.llm.timeout_secs, 60);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OLLAMA_URL", "http://gpu-box:11434/"),
            ("OLLAMA_MODEL", "mistral"),
            ("AVOPS_DATABASE_PATH", "/tmp/avops-test.db"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm.base_url, "http://gpu-box:11434");
        assert_eq!(config.llm.model, "mistral");
        assert_eq!(
            config.storage.database_path,
            PathBuf::from("/tmp/avops-test.db")
        );
        assert_eq!(config.server.bind_addr, "127.0.0.1:8080");
    }

    #[test]
    fn test_save_default_round_trips() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("etc/config.toml");

        Config::save_default(&path).unwrap();
        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.retrieval.top_k, Config::default().retrieval.top_k);
    }
}
