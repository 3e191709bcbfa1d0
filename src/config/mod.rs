//! Application configuration

pub mod agent;
pub mod prompts;

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use agent::{AgentConfig, CatalogSettings, ClassifierBackend};
pub use prompts::{builtin as prompts_builtin, PromptTemplate};

/// Process-level settings read from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub agent_config: PathBuf,
    pub ollama_url: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            data_dir: env::var("SALES_AGENT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            agent_config: env::var("SALES_AGENT_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("configs/agent.toml")),
            ollama_url: env::var("OLLAMA_URL").ok(),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("sales_agent.db")
    }
}
