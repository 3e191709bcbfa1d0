//! LLM provider integrations

mod ollama;

use std::time::Duration;

use thiserror::Error;

use crate::config::agent::ClassifierSettings;
use crate::config::Config;
use crate::conversation::Message;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Per-request generation options
#[derive(Debug, Clone, Copy)]
pub struct ChatOptions {
    /// Constrain the model to emit a JSON object
    pub json: bool,
    pub temperature: f32,
}

impl ChatOptions {
    /// Deterministic JSON output, used for classification
    pub fn structured() -> Self {
        Self {
            json: true,
            temperature: 0.0,
        }
    }
}

pub enum Provider {
    Ollama(ollama::OllamaProvider),
}

impl Provider {
    /// Ollama client for the classifier. The endpoint comes from the
    /// classifier settings, then `OLLAMA_URL`, then the local default.
    pub fn ollama(settings: &ClassifierSettings, config: &Config) -> Result<Self, ProviderError> {
        let url = settings
            .endpoint
            .clone()
            .or_else(|| config.ollama_url.clone())
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.into());
        if url.trim().is_empty() {
            return Err(ProviderError::NotConfigured("ollama endpoint is empty".into()));
        }
        let timeout = Duration::from_secs(settings.timeout_secs);
        Ok(Provider::Ollama(ollama::OllamaProvider::new(url, timeout)?))
    }

    pub fn endpoint(&self) -> &str {
        match self {
            Provider::Ollama(p) => p.base_url(),
        }
    }

    pub async fn chat(
        &self,
        messages: &[Message],
        model: &str,
        options: ChatOptions,
    ) -> Result<Message, ProviderError> {
        match self {
            Provider::Ollama(p) => p.chat(messages, model, options).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(ollama_url: Option<&str>) -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 0,
            data_dir: PathBuf::from("./data"),
            agent_config: PathBuf::from("configs/agent.toml"),
            ollama_url: ollama_url.map(String::from),
        }
    }

    #[test]
    fn test_ollama_endpoint_precedence() {
        let settings = ClassifierSettings::default();
        let provider = Provider::ollama(&settings, &config(None)).unwrap();
        assert_eq!(provider.endpoint(), DEFAULT_OLLAMA_URL);

        let provider = Provider::ollama(&settings, &config(Some("http://gpu-box:11434/"))).unwrap();
        assert_eq!(provider.endpoint(), "http://gpu-box:11434");

        let settings = ClassifierSettings {
            endpoint: Some("http://classifier:11434".into()),
            ..ClassifierSettings::default()
        };
        let provider = Provider::ollama(&settings, &config(Some("http://gpu-box:11434"))).unwrap();
        assert_eq!(provider.endpoint(), "http://classifier:11434");
    }

    #[test]
    fn test_empty_endpoint_is_not_configured() {
        let settings = ClassifierSettings {
            endpoint: Some("  ".into()),
            ..ClassifierSettings::default()
        };
        let err = Provider::ollama(&settings, &config(None)).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
