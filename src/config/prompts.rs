//! Prompt templates for the LLM classifier
//!
//! The classifier prompt can be replaced by a TOML file.
//!
//! # Example Prompt File
//!
//! ```toml
//! [persona]
//! name = "Beauty Store Classifier"
//! description = "Sales stage classifier for a cosmetics shop"
//!
//! [system_prompt]
//! content = """
//! You analyse customer messages for a beauty store...
//! """
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// A prompt template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub persona: PersonaInfo,
    pub system_prompt: SystemPrompt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaInfo {
    pub name: String,

    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub content: String,
}

impl PromptTemplate {
    pub async fn load_from_file(path: &Path) -> Result<Self, PromptError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PromptError::IoError(e.to_string()))?;

        let template: PromptTemplate =
            toml::from_str(&content).map_err(|e| PromptError::ParseError(e.to_string()))?;

        if template.system_prompt.content.trim().is_empty() {
            return Err(PromptError::Empty(path.display().to_string()));
        }
        Ok(template)
    }
}

/// Errors from prompt loading
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Prompt is empty: {0}")]
    Empty(String),
}

/// Built-in prompts that don't require files
pub mod builtin {
    /// Turn classification prompt. The model must answer with JSON only.
    pub const TURN_CLASSIFIER: &str = r#"You are a sales analyst for an online beauty and personal care store. Classify the customer's LATEST message.

Stages:
- GREETING: hello, small talk before any product is mentioned
- INTEREST: the customer says what they need or are looking for
- PRODUCT_DISCOVERY: questions about specific products, features, ingredients
- PRICE_DISCLOSURE: questions about price, cost, budget, discounts
- EVALUATION: comparing options, hesitating, objecting, or dropping a product
- EXPLICIT_CONFIRMATION: an explicit first-person commitment to buy ("I'll take it", "I want to buy X", "yes, confirm my order")

Rules:
1. Positive feelings are NOT confirmation. "Sounds good", "I'm interested", "I like it" are EVALUATION or INTEREST.
2. Use stage null when the message is unrelated to shopping.
3. "reference" is "pronoun" when the purchase object is it/this/that, "all" for both/them/all, otherwise "none".
4. "removals" lists products or categories the customer no longer wants.

Answer with a single JSON object and nothing else:
{"stage": "STAGE_OR_NULL", "confirmed": true|false, "reference": "none|pronoun|all", "removals": ["..."], "confidence": 0.0-1.0}"#;

    /// Product resolution prompt. `{catalog}` is replaced with the product list.
    pub const PRODUCT_RESOLVER: &str = r#"You match customer messages to products in a store catalog.

Catalog (one product per line):
{catalog}

Return the exact catalog names of every product the customer asks for in their message. Pick one product per category mentioned. Ignore products the customer says they no longer want.

Answer with a single JSON object and nothing else:
{"products": ["Exact Catalog Name", "..."]}"#;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_template() {
        let toml_content = r#"
[persona]
name = "Test Classifier"
description = "A test persona"

[system_prompt]
content = "Classify the message."
"#;

        let template: PromptTemplate = toml::from_str(toml_content).unwrap();
        assert_eq!(template.persona.name, "Test Classifier");
        assert_eq!(template.system_prompt.content, "Classify the message.");
    }

    #[tokio::test]
    async fn test_missing_prompt_file() {
        let err = PromptTemplate::load_from_file(Path::new("/nonexistent/prompt.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::IoError(_)));
    }

    #[test]
    fn test_builtin_resolver_has_catalog_slot() {
        assert!(builtin::PRODUCT_RESOLVER.contains("{catalog}"));
    }
}
