//! Configuration loading and management for chatsumma.
//!
//! Loads settings from `chatsumma.toml` with environment variable overrides for sensitive data.
//! Every section has defaults, so running without a config file works.

use crate::agent::DEFAULT_PERSONA;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "chatsumma.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("missing required API key for provider: {0}")]
    MissingApiKey(String),
    #[error("unknown provider: {0} (expected \"openai\" or \"gemini\")")]
    UnknownProvider(String),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// LLM provider: "openai" or "gemini"
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o-mini")
    pub model: String,
    /// System persona for the organiser
    pub persona: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Override for the provider's API root, mainly for proxies and tests
    pub base_url: Option<String>,
}

/// API keys configuration (loaded from environment)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiConfig {
    #[serde(default)]
    pub openai_key: Option<String>,
    #[serde(default)]
    pub gemini_key: Option<String>,
}

/// Batch processing limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Per-call ceiling; a call exceeding it counts as a transient failure
    pub timeout_secs: u64,
    /// Retries for rate-limited or transient failures (0 or 1)
    pub max_retries: u32,
    /// Delay before a retry
    pub backoff_ms: u64,
    /// Extraction calls allowed in flight at once
    pub concurrency: usize,
    /// Reject pastes with more chats than this
    pub max_chats: Option<usize>,
}

/// CSV export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub path: PathBuf,
    /// Joins tags, bullets and action items inside one cell
    pub separator: String,
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

impl Config {
    /// Load configuration from the default location (chatsumma.toml in cwd or home)
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::parse_file(&path)?,
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::parse_file(path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.fill_provider_model(&content);
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Pick the provider's default model when the file names a provider but no model.
    fn fill_provider_model(&mut self, content: &str) {
        let names_model = content
            .parse::<toml::Table>()
            .ok()
            .and_then(|t| t.get("agent").and_then(|a| a.get("model")).cloned())
            .is_some();
        if !names_model {
            self.agent.model = default_model(&self.agent.provider).to_string();
        }
    }

    /// Override API keys from environment variables
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.api.openai_key = Some(key);
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.api.gemini_key = Some(key);
        }
    }

    /// Find the config file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        // Check current directory first
        let local_config = PathBuf::from(CONFIG_FILE_NAME);
        if local_config.exists() {
            return Some(local_config);
        }

        // Check home directory
        let home_config = dirs::home_dir()?
            .join(".config")
            .join("chatsumma")
            .join(CONFIG_FILE_NAME);
        home_config.exists().then_some(home_config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.agent.provider.as_str(), "openai" | "gemini") {
            return Err(ConfigError::UnknownProvider(self.agent.provider.clone()));
        }
        if self.batch.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "batch.timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.batch.max_retries > 1 {
            return Err(ConfigError::Invalid {
                field: "batch.max_retries",
                reason: format!("at most 1 retry is allowed, got {}", self.batch.max_retries),
            });
        }
        if self.batch.concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "batch.concurrency",
                reason: "must be at least 1".into(),
            });
        }
        if self.batch.max_chats == Some(0) {
            return Err(ConfigError::Invalid {
                field: "batch.max_chats",
                reason: "must be at least 1 when set".into(),
            });
        }
        if self.export.separator.is_empty() {
            return Err(ConfigError::Invalid {
                field: "export.separator",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Get the API key for the configured provider
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        let key = match self.agent.provider.as_str() {
            "openai" => self.api.openai_key.as_deref(),
            "gemini" => self.api.gemini_key.as_deref(),
            other => return Err(ConfigError::UnknownProvider(other.to_string())),
        };
        key.filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey(self.agent.provider.clone()))
    }
}

impl BatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

fn default_model(provider: &str) -> &'static str {
    match provider {
        "gemini" => "gemini-2.0-flash",
        _ => "gpt-4o-mini",
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: default_model("openai").to_string(),
            persona: DEFAULT_PERSONA.to_string(),
            temperature: 0.3,
            max_tokens: 600,
            base_url: None,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_retries: 1,
            backoff_ms: 2000,
            concurrency: 1,
            max_chats: None,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("organized_chats.csv"),
            separator: "; ".to_string(),
        }
    }
}
