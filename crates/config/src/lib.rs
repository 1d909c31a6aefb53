//! Configuration loading, validation, and management for Delve.
//!
//! Loads configuration from `~/.delve/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use delve_core::ResearchConfig;
use delve_core::ModelRole;

/// The root configuration structure.
///
/// Maps directly to `~/.delve/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key used by any provider without its own key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Research budgets and switches
    #[serde(default)]
    pub research: ResearchConfig,

    /// Role-bound model assignments
    #[serde(default)]
    pub models: ModelsConfig,

    /// Search backend settings
    #[serde(default)]
    pub search: SearchConfig,

    /// Retry policy for model and search calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("research", &self.research)
            .field("models", &self.models)
            .field("search", &self.search)
            .field("retry", &self.retry)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("tavily_api_key", &redact(&self.tavily_api_key))
            .field("base_url", &self.base_url)
            .field("max_results", &self.max_results)
            .field("topic", &self.topic)
            .field("include_raw_content", &self.include_raw_content)
            .field("summarize_threshold_chars", &self.summarize_threshold_chars)
            .finish()
    }
}

/// One role's model: `"provider:model"` plus an output ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    pub max_tokens: u32,
}

impl ModelConfig {
    fn new(model: &str, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
        }
    }

    /// Split `"provider:model"` into its parts.
    pub fn split(&self) -> Result<(&str, &str), ConfigError> {
        match self.model.split_once(':') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok((provider, model))
            }
            _ => Err(ConfigError::ValidationError(format!(
                "model '{}' must be written as provider:model",
                self.model
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_summarization_model")]
    pub summarization: ModelConfig,

    #[serde(default = "default_research_model")]
    pub research: ModelConfig,

    #[serde(default = "default_compression_model")]
    pub compression: ModelConfig,

    #[serde(default = "default_final_report_model")]
    pub final_report: ModelConfig,
}

fn default_summarization_model() -> ModelConfig {
    ModelConfig::new("openai:gpt-4.1-mini", 8192)
}
fn default_research_model() -> ModelConfig {
    ModelConfig::new("openai:gpt-4.1", 10000)
}
fn default_compression_model() -> ModelConfig {
    ModelConfig::new("openai:gpt-4.1", 8192)
}
fn default_final_report_model() -> ModelConfig {
    ModelConfig::new("openai:gpt-4.1", 10000)
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            summarization: default_summarization_model(),
            research: default_research_model(),
            compression: default_compression_model(),
            final_report: default_final_report_model(),
        }
    }
}

impl ModelsConfig {
    pub fn get(&self, role: ModelRole) -> &ModelConfig {
        match role {
            ModelRole::Summarization => &self.summarization,
            ModelRole::Research => &self.research,
            ModelRole::Compression => &self.compression,
            ModelRole::FinalReport => &self.final_report,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tavily_api_key: Option<String>,

    /// Override the backend endpoint (e.g., a proxy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Tavily topic: "general", "news" or "finance"
    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default = "default_true")]
    pub include_raw_content: bool,

    /// Raw page content longer than this is condensed by the summarization model.
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold_chars: usize,
}

fn default_max_results() -> usize {
    5
}
fn default_topic() -> String {
    "general".into()
}
fn default_true() -> bool {
    true
}
fn default_summarize_threshold() -> usize {
    6000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            base_url: None,
            max_results: default_max_results(),
            topic: default_topic(),
            include_raw_content: true,
            summarize_threshold_chars: default_summarize_threshold(),
        }
    }
}

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    8000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.delve/config.toml).
    ///
    /// Environment variables take priority over the file:
    /// - `DELVE_API_KEY`, then `OPENAI_API_KEY`, `OPENROUTER_API_KEY`
    /// - `ANTHROPIC_API_KEY` (anthropic provider only)
    /// - `TAVILY_API_KEY`
    /// - `DELVE_SEARCH_API`, `DELVE_RESEARCH_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
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

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("DELVE_API_KEY")
            .or_else(|| self.api_key.is_none().then(|| lookup("OPENAI_API_KEY")).flatten())
            .or_else(|| self.api_key.is_none().then(|| lookup("OPENROUTER_API_KEY")).flatten())
        {
            self.api_key = Some(key);
        }

        if let Some(key) = lookup("ANTHROPIC_API_KEY") {
            self.providers.entry("anthropic".into()).or_default().api_key = Some(key);
        }

        if let Some(key) = lookup("TAVILY_API_KEY") {
            self.search.tavily_api_key = Some(key);
        }

        if let Some(api) = lookup("DELVE_SEARCH_API") {
            self.research.search_api = api;
        }

        if let Some(model) = lookup("DELVE_RESEARCH_MODEL") {
            self.models.research.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".delve")
    }

    /// Get the configuration file path.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.research;
        if !(1..=20).contains(&r.max_concurrent_research_units) {
            return Err(ConfigError::ValidationError(
                "research.max_concurrent_research_units must be between 1 and 20".into(),
            ));
        }
        if r.max_researcher_iterations > 20 {
            return Err(ConfigError::ValidationError(
                "research.max_researcher_iterations must be at most 20".into(),
            ));
        }
        if r.max_react_tool_calls > 30 {
            return Err(ConfigError::ValidationError(
                "research.max_react_tool_calls must be at most 30".into(),
            ));
        }
        if r.max_structured_output_retries == 0 {
            return Err(ConfigError::ValidationError(
                "research.max_structured_output_retries must be at least 1".into(),
            ));
        }

        for role in ModelRole::ALL {
            let model = self.models.get(role);
            model.split()?;
            if model.max_tokens == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "models.{role}.max_tokens must be > 0"
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::ValidationError(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".into(),
            ));
        }

        if self.search.max_results == 0 {
            return Err(ConfigError::ValidationError(
                "search.max_results must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// API key for a provider: its own section first, then the generic key.
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some() || self.providers.values().any(|p| p.api_key.is_some())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            research: ResearchConfig::default(),
            models: ModelsConfig::default(),
            search: SearchConfig::default(),
            retry: RetryConfig::default(),
            providers: HashMap::new(),
        }
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

impl From<ConfigError> for delve_core::Error {
    fn from(err: ConfigError) -> Self {
        delve_core::Error::configuration(err.to_string())
    }
}
