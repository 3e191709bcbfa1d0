//! Conversation types and per-sender state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::InterestTracker;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Unknown roles are read back as user turns
    pub fn parse(role: &str) -> Self {
        match role {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// A catalog item the customer is (or was) interested in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub product_id: String,
    pub display_name: String,
    pub category: String,
}

/// Sales funnel stage
///
/// The funnel is ordered but not strictly linear: customers can fall back to
/// an earlier stage at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalesStage {
    #[default]
    Greeting,
    Interest,
    ProductDiscovery,
    PriceDisclosure,
    /// Evaluating options or raising objections
    Evaluation,
    ExplicitConfirmation,
}

impl SalesStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalesStage::Greeting => "GREETING",
            SalesStage::Interest => "INTEREST",
            SalesStage::ProductDiscovery => "PRODUCT_DISCOVERY",
            SalesStage::PriceDisclosure => "PRICE_DISCLOSURE",
            SalesStage::Evaluation => "EVALUATION",
            SalesStage::ExplicitConfirmation => "EXPLICIT_CONFIRMATION",
        }
    }

    pub fn parse(stage: &str) -> Option<Self> {
        match stage.trim().to_ascii_uppercase().as_str() {
            "GREETING" => Some(SalesStage::Greeting),
            "INTEREST" => Some(SalesStage::Interest),
            "PRODUCT_DISCOVERY" => Some(SalesStage::ProductDiscovery),
            "PRICE_DISCLOSURE" => Some(SalesStage::PriceDisclosure),
            "EVALUATION" | "OBJECTION" => Some(SalesStage::Evaluation),
            "EXPLICIT_CONFIRMATION" => Some(SalesStage::ExplicitConfirmation),
            _ => None,
        }
    }
}

/// Everything the agent remembers about one customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub sender_id: String,
    pub message_history: Vec<Message>,
    #[serde(flatten)]
    pub tracker: InterestTracker,
    pub stage: SalesStage,
    pub is_ready: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(sender_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            sender_id: sender_id.into(),
            message_history: Vec::new(),
            tracker: InterestTracker::default(),
            stage: SalesStage::default(),
            is_ready: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_user(&mut self, content: &str) {
        self.message_history.push(Message::user(content));
    }

    pub fn add_assistant(&mut self, content: &str) {
        self.message_history.push(Message::assistant(content));
    }

    /// The most recent `limit` messages, oldest first
    pub fn recent_history(&self, limit: usize) -> &[Message] {
        let start = self.message_history.len().saturating_sub(limit);
        &self.message_history[start..]
    }
}
