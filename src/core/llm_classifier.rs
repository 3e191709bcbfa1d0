//! LLM-backed sales classifier
//!
//! Asks the configured model for a JSON verdict and maps it onto the same
//! types the rule classifier produces. The model never gets the last word on
//! purchase confirmation: its `confirmed` flag is ANDed with the explicit
//! confirmation grammar. Any provider or parse failure falls back to rules.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::catalog::CatalogProduct;
use super::classifier::{
    is_pronoun, ClassifierError, Reference, Removal, RuleClassifier, SalesClassifier, TurnClassification,
};
use crate::config::prompts_builtin;
use crate::conversation::{Message, ProductRef, SalesStage};
use crate::providers::{ChatOptions, Provider};

/// Raw model output for a turn
#[derive(Debug, Deserialize)]
struct LlmVerdict {
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    confirmed: bool,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    removals: Vec<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct LlmProducts {
    #[serde(default)]
    products: Vec<String>,
}

pub struct LlmClassifier {
    provider: Provider,
    model: String,
    system_prompt: String,
    rules: RuleClassifier,
}

impl LlmClassifier {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            system_prompt: prompts_builtin::TURN_CLASSIFIER.to_string(),
            rules: RuleClassifier::new(),
        }
    }

    /// Replace the built-in classification prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    async fn ask(&self, messages: &[Message]) -> Result<String, ClassifierError> {
        let reply = self
            .provider
            .chat(messages, &self.model, ChatOptions::structured())
            .await?;
        Ok(reply.content)
    }

    async fn llm_products(&self, text: &str, catalog: &[CatalogProduct]) -> Result<Vec<ProductRef>, ClassifierError> {
        let listing = catalog
            .iter()
            .map(|p| format!("- {} ({})", p.name, p.category))
            .collect::<Vec<_>>()
            .join("\n");

        let messages = [
            Message::system(prompts_builtin::PRODUCT_RESOLVER.replace("{catalog}", &listing)),
            Message::user(text),
        ];

        let content = self.ask(&messages).await?;
        let parsed: LlmProducts = parse_json(&content)?;
        Ok(self.map_names(&parsed.products, catalog))
    }

    async fn llm_turn(&self, history: &[Message], text: &str) -> Result<TurnClassification, ClassifierError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(text));

        let content = self.ask(&messages).await?;
        let verdict: LlmVerdict = parse_json(&content)?;
        Ok(self.apply_guardrails(verdict, history, text))
    }

    /// Map model-chosen names back to catalog products. Names the model
    /// invented are resolved with the rule matcher or dropped.
    fn map_names(&self, names: &[String], catalog: &[CatalogProduct]) -> Vec<ProductRef> {
        let mut refs: Vec<ProductRef> = Vec::new();
        for name in names {
            let resolved = match catalog.iter().find(|p| p.name.eq_ignore_ascii_case(name.trim())) {
                Some(product) => vec![product.to_ref()],
                None => self.rules.matcher().resolve(name, catalog),
            };
            for product in resolved {
                if !refs.iter().any(|r| r.product_id == product.product_id) {
                    refs.push(product);
                }
            }
        }
        refs
    }

    fn apply_guardrails(&self, verdict: LlmVerdict, history: &[Message], text: &str) -> TurnClassification {
        let rules = self.rules.classify(history, text);
        let object = if verdict.confirmed {
            self.rules.grammar().confirmation(text)
        } else {
            None
        };
        let confirmed = object.is_some();

        let mut stage = match verdict.stage.as_deref() {
            Some(s) if !s.eq_ignore_ascii_case("null") => SalesStage::parse(s).or(rules.stage),
            _ => None,
        };
        if stage == Some(SalesStage::ExplicitConfirmation) && !confirmed {
            tracing::debug!(text = %text, "Model confirmation rejected by grammar");
            stage = Some(SalesStage::Evaluation);
        }
        if confirmed {
            stage = Some(SalesStage::ExplicitConfirmation);
        }

        let reference = match verdict.reference.as_deref().map(str::to_lowercase).as_deref() {
            Some("pronoun") => Reference::Pronoun,
            Some("all") => Reference::All,
            Some("none") => Reference::None,
            _ => rules.reference,
        };

        // Grammar removals carry the exact phrase; model targets only add new
        // named ones. Pronoun removals need the negation the grammar matched.
        let mut removals = rules.removals;
        for target in verdict.removals {
            let target = target.trim().to_string();
            let known = removals.iter().any(|r| r.target.eq_ignore_ascii_case(&target));
            if target.is_empty() || is_pronoun(&target) || known {
                continue;
            }
            removals.push(Removal {
                phrase: target.clone(),
                target,
            });
        }

        TurnClassification {
            stage,
            confirmed,
            object,
            reference,
            removals,
            confidence: verdict.confidence.unwrap_or(rules.confidence).clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl SalesClassifier for LlmClassifier {
    async fn resolve_products(
        &self,
        text: &str,
        catalog: &[CatalogProduct],
    ) -> Result<Vec<ProductRef>, ClassifierError> {
        match self.llm_products(text, catalog).await {
            Ok(products) => Ok(products),
            Err(e) => {
                tracing::warn!("LLM product resolution failed, using rules: {}", e);
                self.rules.resolve_products(text, catalog).await
            }
        }
    }

    async fn classify_turn(
        &self,
        history: &[Message],
        text: &str,
    ) -> Result<TurnClassification, ClassifierError> {
        match self.llm_turn(history, text).await {
            Ok(classification) => Ok(classification),
            Err(e) => {
                tracing::warn!("LLM classification failed, using rules: {}", e);
                Ok(self.rules.classify(history, text))
            }
        }
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}

/// Parse the first JSON object in a model reply, tolerating code fences
/// and surrounding prose
fn parse_json<T: DeserializeOwned>(content: &str) -> Result<T, ClassifierError> {
    let start = content.find('{');
    let end = content.rfind('}');
    let body = match (start, end) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => return Err(ClassifierError::InvalidOutput(content.chars().take(200).collect())),
    };
    serde_json::from_str(body).map_err(|e| ClassifierError::InvalidOutput(e.to_string()))
}
