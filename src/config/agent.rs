//! Agent configuration loaded from a TOML file
//!
//! Each deployment has an agent configuration that defines:
//! - Which classifier backend decides sales stages
//! - Where the product catalog is seeded from and how lookups are retried
//! - How much conversation history the classifier sees
//!
//! Every section is optional; a missing file yields the defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentInfo,

    #[serde(default)]
    pub classifier: ClassifierSettings,

    #[serde(default)]
    pub catalog: CatalogSettings,

    #[serde(default)]
    pub conversation: ConversationSettings,
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::warn!("Agent config {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.conversation.max_history == 0 {
            return Err(ConfigError::Validation(
                "conversation.max_history must be at least 1".into(),
            ));
        }
        if self.classifier.backend == ClassifierBackend::Ollama && self.classifier.model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "classifier.model is required for the ollama backend".into(),
            ));
        }
        Ok(())
    }
}

/// Agent identity and presentation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Label printed in front of prices
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_agent_name() -> String {
    "Sales Assistant".to_string()
}

fn default_currency() -> String {
    "BDT".to_string()
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            currency: default_currency(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    /// Deterministic grammar, no network calls
    #[default]
    Rules,
    /// Ollama model with the rule grammar as fallback and guardrail
    Ollama,
}

/// Classifier backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSettings {
    #[serde(default)]
    pub backend: ClassifierBackend,

    #[serde(default = "default_model")]
    pub model: String,

    /// Overrides `OLLAMA_URL`
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Prompt template TOML replacing the built-in classifier prompt
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "llama3.2".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            backend: ClassifierBackend::default(),
            model: default_model(),
            endpoint: None,
            prompt_file: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Catalog seeding and lookup behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSettings {
    #[serde(default)]
    pub seed_file: Option<PathBuf>,

    /// How long a catalog snapshot is served before reloading
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,

    #[serde(default = "default_lookup_retries")]
    pub lookup_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_refresh_secs() -> u64 {
    60
}

fn default_lookup_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            seed_file: None,
            refresh_secs: default_refresh_secs(),
            lookup_retries: default_lookup_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Conversation handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSettings {
    /// Messages handed to the classifier as context
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Attempts at persisting a turn before giving up
    #[serde(default = "default_save_retries")]
    pub save_retries: u32,
}

fn default_max_history() -> usize {
    20
}

fn default_save_retries() -> u32 {
    3
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            save_retries: default_save_retries(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
[agent]
name = "Glow Beauty Assistant"
currency = "USD"

[classifier]
backend = "ollama"
model = "llama3.1:8b"
endpoint = "http://ollama.internal:11434"

[catalog]
seed_file = "configs/catalog.toml"
lookup_retries = 5

[conversation]
max_history = 10
"#;

    #[test]
    fn test_parse_config() {
        let config = AgentConfig::from_str(SAMPLE_CONFIG).unwrap();

        assert_eq!(config.agent.name, "Glow Beauty Assistant");
        assert_eq!(config.agent.currency, "USD");
        assert_eq!(config.classifier.backend, ClassifierBackend::Ollama);
        assert_eq!(config.classifier.model, "llama3.1:8b");
        assert_eq!(config.catalog.seed_file, Some(PathBuf::from("configs/catalog.toml")));
        assert_eq!(config.catalog.lookup_retries, 5);
        assert_eq!(config.catalog.refresh_secs, 60); // Default
        assert_eq!(config.conversation.max_history, 10);
        assert_eq!(config.conversation.save_retries, 3); // Default
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AgentConfig::from_str("").unwrap();
        assert_eq!(config.classifier.backend, ClassifierBackend::Rules);
        assert_eq!(config.agent.currency, "BDT");
        assert_eq!(config.conversation.max_history, 20);
    }

    #[test]
    fn test_rejects_zero_history() {
        let err = AgentConfig::from_str("[conversation]\nmax_history = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AgentConfig::load_or_default(Path::new("/nonexistent/agent.toml")).unwrap();
        assert_eq!(config.agent.name, "Sales Assistant");
    }
}
