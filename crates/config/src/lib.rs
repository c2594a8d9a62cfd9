//! Configuration loading, validation, and management for Parley.
//!
//! Loads configuration from `~/.parley/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.parley/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Defaults for each user's live session flags
    #[serde(default)]
    pub session: SessionDefaults,

    /// Registered users and chat groups
    #[serde(default)]
    pub accounts: AccountsConfig,

    /// Long-term memory backend
    #[serde(default)]
    pub memory: MemoryConfig,

    /// LLM endpoint
    #[serde(default)]
    pub provider: ProviderConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Global knobs of the reasoning loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum reason/act/observe cycles per task
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// How long a suspended task waits for the user
    #[serde(default = "default_mailbox_timeout")]
    pub mailbox_timeout_seconds: u64,

    /// Wait bound for the instruct phase; falls back to the mailbox timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruct_timeout_seconds: Option<u64>,

    /// Match confirmations against a fixed vocabulary instead of asking the LLM
    #[serde(default)]
    pub authorize_strict_mode: bool,

    /// Cap on observation text carried into later prompts (0 = unbounded)
    #[serde(default = "default_observation_max_chars")]
    pub observation_max_chars: usize,
}

fn default_max_iterations() -> u32 {
    20
}
fn default_mailbox_timeout() -> u64 {
    240
}
fn default_observation_max_chars() -> usize {
    8000
}

impl AgentSettings {
    /// Effective instruct-phase wait bound.
    pub fn instruct_timeout(&self) -> u64 {
        self.instruct_timeout_seconds
            .unwrap_or(self.mailbox_timeout_seconds)
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            mailbox_timeout_seconds: default_mailbox_timeout(),
            instruct_timeout_seconds: None,
            authorize_strict_mode: false,
            observation_max_chars: default_observation_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(default)]
    pub enable_instruct: bool,
    #[serde(default)]
    pub enable_comment: bool,
    #[serde(default)]
    pub reply_in_speech: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountsConfig {
    #[serde(default)]
    pub users: Vec<String>,
    /// Chat group id -> member user ids
    #[serde(default)]
    pub chat_groups: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "in_memory" or "file"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// Directory for the file backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_memory_backend() -> String {
    "in_memory".into()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.1
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    42618
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.parley/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `PARLEY_API_KEY`, then `OPENAI_API_KEY`
    /// - `PARLEY_BASE_URL`, `PARLEY_MODEL`
    /// - `PARLEY_MAX_ITERATIONS`, `PARLEY_MAILBOX_TIMEOUT`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None)
    }

    /// Like [`load`](Self::load), reading `path` instead of the default file
    /// when one is given.
    pub fn load_with(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// `~/.parley/config.toml`
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// A copy safe to print: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.provider.api_key.is_some() {
            copy.provider.api_key = Some("[REDACTED]".into());
        }
        copy
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the environment in production).
    fn apply_env_overrides(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if self.provider.api_key.is_none() {
            self.provider.api_key = var("PARLEY_API_KEY").or_else(|| var("OPENAI_API_KEY"));
        }
        if let Some(url) = var("PARLEY_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(model) = var("PARLEY_MODEL") {
            self.provider.model = model;
        }
        if let Some(raw) = var("PARLEY_MAX_ITERATIONS") {
            self.agent.max_iterations = raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!("PARLEY_MAX_ITERATIONS is not a number: {raw}"))
            })?;
        }
        if let Some(raw) = var("PARLEY_MAILBOX_TIMEOUT") {
            self.agent.mailbox_timeout_seconds = raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!("PARLEY_MAILBOX_TIMEOUT is not a number: {raw}"))
            })?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parley")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.agent.mailbox_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.mailbox_timeout_seconds must be at least 1".into(),
            ));
        }

        if self.provider.temperature < 0.0 || self.provider.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        match self.memory.backend.as_str() {
            "in_memory" => {}
            "file" if self.memory.path.is_some() => {}
            "file" => {
                return Err(ConfigError::ValidationError(
                    "memory.path is required for the file backend".into(),
                ));
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown memory backend: {other}"
                )));
            }
        }

        for (group, members) in &self.accounts.chat_groups {
            if let Some(stranger) = members.iter().find(|m| !self.accounts.users.contains(m)) {
                return Err(ConfigError::ValidationError(format!(
                    "chat group {group} lists unregistered user {stranger}"
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
