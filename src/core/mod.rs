//! Core sales agent components
//!
//! Interest tracking, stage classification and the readiness gate, plus the
//! engine that runs them for each customer turn.

pub mod catalog;
pub mod classifier;
mod engine;
pub mod gate;
mod llm_classifier;
mod matcher;
pub mod memory;
mod responder;
mod tracker;

pub use catalog::ProductCatalog;
pub use classifier::{RuleClassifier, SalesClassifier};
pub use engine::{EngineError, SalesEngine, TurnOutcome};
pub use llm_classifier::LlmClassifier;
pub use memory::ConversationStore;
pub use responder::ResponseComposer;
pub use tracker::InterestTracker;
