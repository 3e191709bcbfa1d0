//! Sales turn engine
//!
//! The SalesEngine runs one customer turn end to end:
//! 1. Validates the request and takes the sender's turn lock
//! 2. Loads (or creates) the conversation state
//! 3. Classifies the message and applies explicit removals
//! 4. Resolves newly mentioned products and the confirmation target
//! 5. Updates the stage and evaluates the readiness gate
//! 6. Composes the reply and records every price it showed
//! 7. Saves the conversation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

use crate::config::agent::ConversationSettings;
use crate::conversation::{ConversationState, Message, ProductRef, Role, SalesStage};

use super::catalog::{CatalogProduct, ProductCatalog};
use super::classifier::{normalize_apostrophes, ClassifierError, PurchaseObject, Reference, SalesClassifier};
use super::gate::{self, Readiness};
use super::matcher::ProductMatcher;
use super::memory::{ConversationStore, StoreError};
use super::responder::{ReplyContext, ResponseComposer};

/// Base delay between save attempts, multiplied by the attempt number
const SAVE_BACKOFF_MS: u64 = 50;

/// Stage reported for senders with no stored conversation
const NO_CONVERSATION: &str = "NO_CONVERSATION";

type TurnLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Result of a processed turn, as returned to the webhook caller
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub sender: String,
    pub response_text: String,
    pub product_interested: String,
    pub interested_product_ids: Vec<String>,
    pub is_ready: bool,
    pub conversation_stage: SalesStage,
    pub confidence: f32,
    /// Hand the conversation to a human to close the sale
    pub handover: bool,
}

/// Stored state of a conversation, without the message bodies
#[derive(Debug, Clone, Serialize)]
pub struct ConversationStatus {
    pub sender: String,
    pub conversation_stage: SalesStage,
    pub is_ready: bool,
    pub product_interested: String,
    pub interested_product_ids: Vec<String>,
    pub prices_disclosed: Vec<String>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Summary of a conversation for whoever takes it over
#[derive(Debug, Clone, Serialize)]
pub struct ConversationInsights {
    pub conversation_length: usize,
    pub customer_messages: usize,
    pub current_stage: String,
    pub products_discussed: usize,
    pub product_ids: Vec<String>,
    /// Tracked products whose price the customer has not seen
    pub prices_pending: Vec<String>,
    pub is_ready: bool,
    pub insights_available: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl ConversationInsights {
    fn empty() -> Self {
        Self {
            conversation_length: 0,
            customer_messages: 0,
            current_stage: NO_CONVERSATION.to_string(),
            products_discussed: 0,
            product_ids: Vec::new(),
            prices_pending: Vec::new(),
            is_ready: false,
            insights_available: false,
            last_updated: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub product_id: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub score: u32,
    pub tracked: bool,
}

/// Errors from the sales engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

pub struct SalesEngine {
    store: ConversationStore,
    catalog: Arc<ProductCatalog>,
    classifier: Arc<dyn SalesClassifier>,
    composer: ResponseComposer,
    matcher: ProductMatcher,
    settings: ConversationSettings,
    turn_locks: TurnLocks,
}

/// A held turn lock. Dropping it forgets the sender's lock once no other
/// turn holds or waits for it.
struct TurnGuard<'a> {
    locks: &'a TurnLocks,
    sender: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        drop(self.guard.take());
        if locks.get(&self.sender).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.sender);
        }
    }
}

impl SalesEngine {
    pub fn new(
        store: ConversationStore,
        catalog: Arc<ProductCatalog>,
        classifier: Arc<dyn SalesClassifier>,
        composer: ResponseComposer,
        settings: ConversationSettings,
    ) -> Self {
        Self {
            store,
            catalog,
            classifier,
            composer,
            matcher: ProductMatcher::new(),
            settings,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    /// Turns for one sender run one at a time; different senders in parallel
    async fn lock_turn(&self, sender: &str) -> TurnGuard<'_> {
        let lock = self
            .turn_locks
            .lock()
            .entry(sender.to_string())
            .or_default()
            .clone();

        TurnGuard {
            locks: &self.turn_locks,
            sender: sender.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn held_locks(&self) -> usize {
        self.turn_locks.lock().len()
    }

    /// Process one inbound customer message
    pub async fn process_message(&self, sender: &str, text: &str) -> Result<TurnOutcome, EngineError> {
        let sender = sender.trim();
        let text = text.trim();
        if sender.is_empty() {
            return Err(EngineError::InvalidRequest("sender is required".into()));
        }
        if text.is_empty() {
            return Err(EngineError::InvalidRequest("text is required".into()));
        }

        let _turn = self.lock_turn(sender).await;

        let mut state = match self.store.load(sender).await? {
            Some(state) => state,
            None => {
                tracing::info!(sender = %sender, "New conversation");
                ConversationState::new(sender)
            }
        };

        let normalized = normalize_apostrophes(text);
        let catalog = self.catalog.products().await;
        let history = state.recent_history(self.settings.max_history).to_vec();

        let classification = self.classifier.classify_turn(&history, &normalized).await?;
        tracing::debug!(
            sender = %sender,
            stage = ?classification.stage,
            confirmed = classification.confirmed,
            "Classified turn"
        );

        // Explicit negations first, and keep the negated phrases out of
        // product resolution
        let mut removed: Vec<ProductRef> = Vec::new();
        let mut remainder = normalized.clone();
        for removal in &classification.removals {
            remainder = cut_phrase(&remainder, &removal.phrase);
            if removal.is_pronoun() {
                let ordered = ordered_catalog(&catalog, &state.tracker.tracked_products);
                if let Some(antecedent) = self.antecedent(&state.message_history, &state.tracker.tracked_products, &ordered) {
                    removed.extend(state.tracker.remove_id(&antecedent.product_id));
                }
            } else {
                removed.extend(state.tracker.remove(&removal.target));
            }
        }

        let ordered = ordered_catalog(&catalog, &state.tracker.tracked_products);
        let mentioned = self.classifier.resolve_products(&remainder, &ordered).await?;
        let added = state.tracker.add(mentioned.iter().cloned());

        // A confirmation naming its object only counts if that object is a product
        let confirmed = classification.confirmed
            && (classification.object != Some(PurchaseObject::Named) || !mentioned.is_empty());
        if classification.confirmed && !confirmed {
            tracing::debug!(sender = %sender, "Confirmation object is not a catalog product");
        }

        if confirmed && mentioned.is_empty() && classification.reference == Reference::Pronoun {
            match self.antecedent(&state.message_history, &state.tracker.tracked_products, &ordered) {
                Some(antecedent) => {
                    tracing::debug!(sender = %sender, product = %antecedent.display_name, "Resolved confirmation antecedent");
                    state.tracker.add([antecedent]);
                }
                None => tracing::debug!(sender = %sender, "Confirmation without an antecedent"),
            }
        }

        let off_topic = classification.stage.is_none() && mentioned.is_empty() && removed.is_empty();
        let stage = match classification.stage {
            Some(SalesStage::ExplicitConfirmation) if !confirmed => SalesStage::Interest,
            Some(stage) => stage,
            None if !mentioned.is_empty() => SalesStage::ProductDiscovery,
            None => state.stage,
        };

        // Gate runs before the reply so prices shown this turn never count
        let readiness = gate::evaluate(confirmed, &state.tracker);
        if let Readiness::PricesPending(ids) = &readiness {
            tracing::info!(sender = %sender, pending = ids.len(), "Confirmation blocked until prices are shown");
        }

        let reply = self.composer.compose(&ReplyContext {
            stage,
            off_topic,
            readiness: &readiness,
            tracker: &state.tracker,
            added: &added,
            removed: &removed,
            catalog: &catalog,
        });
        for product_id in &reply.disclosed {
            state.tracker.disclose_price(product_id);
        }

        state.stage = stage;
        state.is_ready = readiness.is_ready();
        state.add_user(text);
        state.add_assistant(&reply.text);
        state.updated_at = Utc::now();

        self.save(&state).await?;

        if state.is_ready {
            tracing::info!(sender = %sender, products = state.tracker.len(), "Customer ready to purchase");
        }

        let snapshot = state.tracker.snapshot();
        Ok(TurnOutcome {
            sender: sender.to_string(),
            response_text: reply.text,
            product_interested: snapshot.product_interested,
            interested_product_ids: snapshot.product_ids,
            is_ready: state.is_ready,
            conversation_stage: stage,
            confidence: classification.confidence,
            handover: state.is_ready,
        })
    }

    /// Most recently discussed product: tracked products mentioned in
    /// history first, then any catalog product named there
    fn antecedent(
        &self,
        history: &[Message],
        tracked: &[ProductRef],
        catalog: &[CatalogProduct],
    ) -> Option<ProductRef> {
        history.iter().rev().find_map(|message| {
            tracked
                .iter()
                .find(|p| self.matcher.mentions(&message.content, p))
                .cloned()
                .or_else(|| {
                    let lower = message.content.to_lowercase();
                    catalog
                        .iter()
                        .find(|p| lower.contains(&p.name.to_lowercase()))
                        .map(CatalogProduct::to_ref)
                })
        })
    }

    async fn save(&self, state: &ConversationState) -> Result<(), StoreError> {
        let attempts = self.settings.save_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.store.save(state).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    tracing::warn!(sender = %state.sender_id, attempt, error = %e, "Saving conversation failed, retrying");
                    tokio::time::sleep(Duration::from_millis(SAVE_BACKOFF_MS * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(sender = %state.sender_id, error = %e, "Saving conversation failed");
                    return Err(e);
                }
            }
        }
    }

    /// Forget everything about a sender. Returns whether a conversation existed.
    pub async fn reset(&self, sender: &str) -> Result<bool, EngineError> {
        let sender = sender.trim();
        if sender.is_empty() {
            return Err(EngineError::InvalidRequest("sender is required".into()));
        }

        let _turn = self.lock_turn(sender).await;
        let existed = self.store.clear(sender).await?;

        tracing::info!(sender = %sender, existed, "Conversation reset");
        Ok(existed)
    }

    pub async fn status(&self, sender: &str) -> Result<Option<ConversationStatus>, EngineError> {
        let Some(state) = self.store.load(sender.trim()).await? else {
            return Ok(None);
        };

        let snapshot = state.tracker.snapshot();
        Ok(Some(ConversationStatus {
            sender: state.sender_id,
            conversation_stage: state.stage,
            is_ready: state.is_ready,
            product_interested: snapshot.product_interested,
            interested_product_ids: snapshot.product_ids,
            prices_disclosed: state.tracker.prices_disclosed.into_iter().collect(),
            message_count: state.message_history.len(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        }))
    }

    /// Conversation summary for a handover. Unknown senders get an empty
    /// summary with stage `NO_CONVERSATION`.
    pub async fn insights(&self, sender: &str) -> Result<ConversationInsights, EngineError> {
        let Some(state) = self.store.load(sender.trim()).await? else {
            return Ok(ConversationInsights::empty());
        };

        Ok(ConversationInsights {
            conversation_length: state.message_history.len(),
            customer_messages: state
                .message_history
                .iter()
                .filter(|m| m.role == Role::User)
                .count(),
            current_stage: state.stage.as_str().to_string(),
            products_discussed: state.tracker.len(),
            product_ids: state.tracker.snapshot().product_ids,
            prices_pending: state
                .tracker
                .undisclosed()
                .into_iter()
                .map(|p| p.product_id.clone())
                .collect(),
            is_ready: state.is_ready,
            insights_available: true,
            last_updated: Some(state.updated_at),
        })
    }

    /// Catalog products ranked for a sender. Without an explicit query the
    /// tracked products and the latest user message drive the ranking.
    pub async fn recommendations(
        &self,
        sender: &str,
        query: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Recommendation>, EngineError> {
        let state = self.store.load(sender.trim()).await?;
        let tracked: Vec<ProductRef> = state
            .as_ref()
            .map(|s| s.tracker.tracked_products.clone())
            .unwrap_or_default();

        let query = match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => q.to_string(),
            None => {
                let mut terms: Vec<String> = tracked
                    .iter()
                    .map(|p| format!("{} {}", p.display_name, p.category))
                    .collect();
                if let Some(last) = state
                    .as_ref()
                    .and_then(|s| s.message_history.iter().rev().find(|m| m.role == Role::User))
                {
                    terms.push(last.content.clone());
                }
                terms.join(" ")
            }
        };

        let catalog = self.catalog.products().await;
        Ok(self
            .matcher
            .rank(&query, &catalog)
            .into_iter()
            .take(limit)
            .map(|scored| Recommendation {
                tracked: tracked.iter().any(|t| t.product_id == scored.product.id),
                price: scored.product.effective_price(),
                product_id: scored.product.id,
                name: scored.product.name,
                category: scored.product.category,
                score: scored.score,
            })
            .collect())
    }
}

/// Remove `phrase` from `text` wherever it stands as whole words
fn cut_phrase(text: &str, phrase: &str) -> String {
    let phrase = phrase.trim();
    if phrase.is_empty() {
        return text.to_string();
    }

    let boundary = |c: Option<char>| match c {
        Some(c) if c.is_alphanumeric() || c == '_' => r"\b",
        _ => "",
    };
    let pattern = format!(
        "(?i){}{}{}",
        boundary(phrase.chars().next()),
        regex::escape(phrase),
        boundary(phrase.chars().last())
    );

    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(text, " , ").into_owned(),
        Err(e) => {
            tracing::warn!(phrase = %phrase, error = %e, "Could not cut phrase");
            text.to_string()
        }
    }
}

/// Catalog with already tracked products moved to the front, so repeated
/// mentions resolve to the same product
fn ordered_catalog(catalog: &[CatalogProduct], tracked: &[ProductRef]) -> Vec<CatalogProduct> {
    let (mut first, rest): (Vec<CatalogProduct>, Vec<CatalogProduct>) = catalog
        .iter()
        .cloned()
        .partition(|p| tracked.iter().any(|t| t.product_id == p.id));
    first.extend(rest);
    first
}
