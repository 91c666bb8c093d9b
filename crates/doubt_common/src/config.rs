//! Doubt Solver configuration.
//!
//! Config file: $DOUBT_CONFIG, ~/.config/doubt-solver/config.toml or
//! /etc/doubt-solver/config.toml. Secrets are better supplied through the
//! environment (OPENAI_API_KEY) than written to disk.

use crate::image_host::ImageHostConfig;
use crate::llm_client::LlmConfig;
use crate::solver::SolverConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CONFIG_ENV: &str = "DOUBT_CONFIG";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DB_PATH_ENV: &str = "DOUBT_DB_PATH";
pub const BIND_ENV: &str = "DOUBT_BIND";

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("doubt-solver").join("doubt.db"))
        .unwrap_or_else(|| PathBuf::from("doubt.db"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Web API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7870".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub image_host: ImageHostConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub solver: SolverConfig,
}

impl Config {
    /// User config path: ~/.config/doubt-solver/config.toml
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("doubt-solver").join("config.toml"))
    }

    /// System config path: /etc/doubt-solver/config.toml
    pub fn system_config_path() -> PathBuf {
        PathBuf::from("/etc/doubt-solver/config.toml")
    }

    /// Load configuration
    ///
    /// Priority:
    /// 1. $DOUBT_CONFIG
    /// 2. User config (~/.config/doubt-solver/config.toml)
    /// 3. System config (/etc/doubt-solver/config.toml)
    /// 4. Defaults
    ///
    /// Environment overrides are applied on top of whichever was found.
    pub fn load() -> Result<Self> {
        let mut config = match Self::locate() {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Self::load_from(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                return Some(user_path);
            }
        }
        let system_path = Self::system_config_path();
        system_path.exists().then_some(system_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid configuration")
    }

    /// Apply environment overrides through a lookup function
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.llm.api_key = Some(key);
        }
        if let Some(path) = lookup(DB_PATH_ENV) {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(bind) = lookup(BIND_ENV) {
            self.server.bind = bind;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_host::ImageHostMode;
    use crate::normalizer::Strategy;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_tokens, 1000);
        assert_eq!(config.image_host.mode, ImageHostMode::Inline);
        assert_eq!(config.server.bind, "127.0.0.1:7870");
        assert_eq!(config.solver.strategy, Strategy::PreserveAndFix);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
[llm]
model = "gpt-4o-mini"

[solver]
strategy = "commands"
max_user_messages = 3
"#,
        )
        .unwrap();

        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.max_tokens, 1000);
        assert_eq!(config.solver.strategy, Strategy::CommandTable);
        assert_eq!(config.solver.max_user_messages, 3);
        assert_eq!(config.server.bind, "127.0.0.1:7870");
    }

    #[test]
    fn test_remote_image_host_section() {
        let config = Config::from_toml_str(
            r#"
[image_host]
mode = "remote"
upload_url = "https://api.cloudinary.com/v1_1/demo/image/upload"
upload_preset = "doubts"
width = 800
height = 600
"#,
        )
        .unwrap();

        assert_eq!(config.image_host.mode, ImageHostMode::Remote);
        assert_eq!(config.image_host.width, Some(800));
        assert_eq!(config.image_host.folder, "doubt-solver");
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(Config::from_toml_str("[llm\nmodel = 1").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (API_KEY_ENV, "sk-test"),
            (DB_PATH_ENV, "/tmp/doubt-test.db"),
            (BIND_ENV, "0.0.0.0:9000"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.storage.db_path, PathBuf::from("/tmp/doubt-test.db"));
        assert_eq!(config.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn test_blank_api_key_is_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| (key == API_KEY_ENV).then(|| "  ".to_string()));
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server]\nbind = \"127.0.0.1:1\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:1");
    }
}
