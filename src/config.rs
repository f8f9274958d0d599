//! Configuration loading and management for condense.
//!
//! Loads settings from `condense.toml` with environment variable overrides
//! for deployment-specific values (API base URL and agent identifier).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Summarizer agent endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the agent API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Identifier of the summarizer agent to invoke
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    /// Sampling temperature forwarded to the agent
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Completion budget forwarded to the agent
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Whether to request streaming delivery by default
    #[serde(default = "default_streaming")]
    pub streaming: bool,
}

/// Storage paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base path for data storage
    pub path: PathBuf,
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_base_url() -> String {
    "http://localhost:8787".to_string()
}

fn default_agent_id() -> String {
    "summarizer".to_string()
}

fn default_streaming() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            agent_id: default_agent_id(),
            temperature: None,
            max_tokens: None,
            streaming: default_streaming(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data"),
        }
    }
}

impl Config {
    /// Load configuration from the default locations, falling back to
    /// built-in defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::load_from(&path)?,
            None => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply the two recognized environment overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(base) = std::env::var("CONDENSE_API_BASE") {
            self.agent.base_url = base;
        }
        if let Ok(agent) = std::env::var("CONDENSE_AGENT_ID") {
            self.agent.agent_id = agent;
        }
    }

    /// Find the config file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        // Check current directory first
        let local_config = PathBuf::from("condense.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        // Check home directory
        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config").join("condense").join("condense.toml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [agent]
            base_url = "https://agents.example.test"
            "#,
        )
        .unwrap();

        assert_eq!(config.agent.base_url, "https://agents.example.test");
        assert_eq!(config.agent.agent_id, "summarizer");
        assert!(config.agent.streaming);
        assert_eq!(config.storage.path, PathBuf::from("./data"));
    }

    #[test]
    fn empty_file_is_fully_defaulted() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.agent.base_url, "http://localhost:8787");
        assert!(config.agent.temperature.is_none());
    }
}
