//! Sales stage classification
//!
//! `SalesClassifier` is the seam between the turn engine and whatever decides
//! what a message means. `RuleClassifier` is a deterministic grammar; the
//! LLM-backed classifier lives in `llm_classifier` and defers to this grammar
//! for purchase confirmation.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::catalog::CatalogProduct;
use super::matcher::ProductMatcher;
use crate::conversation::{Message, ProductRef, SalesStage};
use crate::providers::ProviderError;

/// What the purchase object of a confirmation refers to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reference {
    /// Named products, or no object at all
    #[default]
    None,
    /// it / this / that / this product
    Pronoun,
    /// both / them / all of them / these
    All,
}

/// A product or category the customer no longer wants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Removal {
    /// The full negation phrase as written, to strip before product resolution
    pub phrase: String,
    /// What is being dropped ("shampoo", "it")
    pub target: String,
}

impl Removal {
    pub fn is_pronoun(&self) -> bool {
        is_pronoun(&self.target)
    }
}

/// Classifier verdict for a single turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnClassification {
    /// `None` for off-topic turns; the previous stage stays in effect
    pub stage: Option<SalesStage>,
    /// Explicit purchase confirmation in this message
    pub confirmed: bool,
    /// What the confirmation is bound to, when there is one
    #[serde(default)]
    pub object: Option<PurchaseObject>,
    pub reference: Reference,
    pub removals: Vec<Removal>,
    pub confidence: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid classifier output: {0}")]
    InvalidOutput(String),
}

/// Pluggable turn classifier
#[async_trait]
pub trait SalesClassifier: Send + Sync {
    /// Catalog products the text asks for, one per mentioned product or category
    async fn resolve_products(
        &self,
        text: &str,
        catalog: &[CatalogProduct],
    ) -> Result<Vec<ProductRef>, ClassifierError>;

    /// Stage and confirmation for the latest message
    async fn classify_turn(
        &self,
        history: &[Message],
        text: &str,
    ) -> Result<TurnClassification, ClassifierError>;

    fn name(&self) -> &'static str;
}

/// Words that point at a product already under discussion
const REFERENCE_WORDS: &[&str] = &[
    "it", "them", "this", "that", "these", "those", "both", "all", "everything", "one", "two", "three", "same",
    "product", "products",
];

/// Objects that name nothing in particular
const INDEFINITE_WORDS: &[&str] = &[
    "something", "anything", "another", "more", "else", "other", "others", "some", "any", "stuff", "different",
    "new", "few",
];

/// Skipped when looking for the purchase object
const OBJECT_FILLERS: &[&str] = &["please", "now", "today", "right", "just", "the", "a", "an", "my"];

/// What a confirmation's purchase object is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseObject {
    /// A pronoun, a plural reference, or no object ("yes, confirm")
    Reference,
    /// Product words; only a confirmation if they resolve to a catalog product
    Named,
}

/// How a commitment pattern relates to the words after it
#[derive(Debug, Clone, Copy)]
enum ObjectRule {
    /// The pattern already contains its object
    Included,
    Required,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    Missing,
    Reference,
    Indefinite,
    Named,
}

/// Explicit purchase confirmation grammar.
///
/// A match needs a first-person present/future commitment verb bound to a
/// purchase object. Positive affect alone never matches, and neither does an
/// indefinite object ("I want to buy something else").
pub struct ConfirmationGrammar {
    commitments: Vec<(Regex, ObjectRule)>,
    hedges: Regex,
    negations: Regex,
}

impl ConfirmationGrammar {
    pub fn new() -> Self {
        let commitments = [
            // I'll take it / I will buy both / I'll order the shampoo
            (
                r"\bi(?:'ll|\s+will|\s+shall)\s+(?:definitely\s+|just\s+)?(?:take|buy|purchase|order|get)\b",
                ObjectRule::Required,
            ),
            // I want to buy X / I would like to order X / I'd like to purchase X
            (
                r"\bi(?:'d\s+like|(?:\s+really|\s+definitely)?\s+(?:want|would\s+like|wish))\s+to\s+(?:buy|purchase|order)\b",
                ObjectRule::Required,
            ),
            // yes, I'll buy / yes confirm / ok, order it
            (
                r"\b(?:yes|yeah|yep|yup|sure|ok|okay)\b[\s,.!]+(?:please\s+)?(?:i(?:'ll|\s+will)?\s+)?(?:buy|confirm|order|purchase|take)\b",
                ObjectRule::Optional,
            ),
            // let me order X / let me buy X
            (r"\blet\s+me\s+(?:buy|order|purchase)\b", ObjectRule::Required),
            // I'm ready to buy / I am ready to order
            (
                r"\bi(?:'m|\s+am)\s+ready\s+to\s+(?:buy|order|purchase|checkout|check\s+out)\b",
                ObjectRule::Optional,
            ),
            // confirm my order / place the order
            (r"\b(?:confirm|place|complete)\s+(?:my|the|this)\s+(?:order|purchase)\b", ObjectRule::Included),
        ];

        Self {
            commitments: commitments
                .iter()
                .map(|(p, rule)| {
                    let re = Regex::new(&format!("(?i){}", p)).expect("valid confirmation pattern");
                    (re, *rule)
                })
                .collect(),
            hedges: Regex::new(
                r"(?i)\b(?:take\s+a\s+look|take\s+a\s+moment|think\s+about|think\s+it\s+over|get\s+back|consider)\b",
            )
            .expect("valid hedge pattern"),
            negations: Regex::new(
                r"(?i)\b(?:not|never|don't|dont|do\s+not|won't|wont|can't|cannot|no\s+longer)\s+(?:\w+\s+)?(?:want|buy|take|order|purchase|ready|need)\b",
            )
            .expect("valid negation pattern"),
        }
    }

    /// The purchase object of an explicit confirmation in `text`, `None` if
    /// the text does not confirm a purchase
    pub fn confirmation(&self, text: &str) -> Option<PurchaseObject> {
        let text = &normalize_apostrophes(text);
        if text.trim_end().ends_with('?') {
            return None;
        }
        if self.hedges.is_match(text) || self.negations.is_match(text) {
            return None;
        }

        self.commitments.iter().find_map(|(re, rule)| {
            re.find_iter(text).find_map(|m| {
                let object = match rule {
                    ObjectRule::Included => ObjectKind::Reference,
                    _ => purchase_object(&text[m.end()..]),
                };
                match (object, rule) {
                    (ObjectKind::Reference, _) => Some(PurchaseObject::Reference),
                    (ObjectKind::Named, _) => Some(PurchaseObject::Named),
                    (ObjectKind::Missing, ObjectRule::Optional) => Some(PurchaseObject::Reference),
                    _ => None,
                }
            })
        })
    }

    /// Whether `text` is an explicit, unambiguous purchase confirmation
    pub fn is_confirmation(&self, text: &str) -> bool {
        self.confirmation(text).is_some()
    }
}

/// Classify the first content word of the clause following a commitment verb
fn purchase_object(rest: &str) -> ObjectKind {
    let clause = rest.split(['.', ',', '!', '?', ';']).next().unwrap_or_default();
    let word = clause
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .find(|w| !w.is_empty() && !OBJECT_FILLERS.contains(&w.as_str()));

    match word.as_deref() {
        None => ObjectKind::Missing,
        Some(w) if REFERENCE_WORDS.contains(&w) || w.chars().all(|c| c.is_ascii_digit()) => ObjectKind::Reference,
        Some(w) if INDEFINITE_WORDS.contains(&w) => ObjectKind::Indefinite,
        Some(_) => ObjectKind::Named,
    }
}

impl Default for ConfirmationGrammar {
    fn default() -> Self {
        Self::new()
    }
}

struct StagePatterns {
    greeting: Regex,
    objection: Regex,
    price: Regex,
    discovery: Regex,
    interest: Regex,
    removal: Regex,
    clause_end: Regex,
    conjunction: Regex,
    plural_reference: Regex,
    pronoun_reference: Regex,
}

impl StagePatterns {
    fn new() -> Self {
        let compile = |p: &str| Regex::new(&format!("(?i){}", p)).expect("valid stage pattern");
        Self {
            greeting: compile(r"^\s*(?:hi|hello|hey|hiya|good\s+(?:morning|afternoon|evening)|assalamu\s*alaikum|salam)\b"),
            objection: compile(
                r"\b(?:too\s+expensive|too\s+costly|too\s+much|cheaper|not\s+sure|hmm+|compare|comparison|versus|vs\.?|better\s+than|difference|alternative|worried|concern|doubt|sounds\s+good|seems?\s+(?:good|perfect|reasonable|nice|fine)|i\s+like|i\s+love)\b",
            ),
            price: compile(
                r"\b(?:price|prices|pricing|cost|costs|how\s+much|expensive|cheap|afford|budget|discount|offer|taka|tk|bdt)\b",
            ),
            discovery: compile(
                r"\b(?:tell\s+me\s+(?:more\s+)?about|features?|benefits?|ingredients?|how\s+does|how\s+to\s+use|show\s+me|details?|recommend|suggest|options|which\s+one|suitable|good\s+for)\b",
            ),
            interest: compile(
                r"\b(?:looking\s+for|need|want|searching|interested|shopping\s+for|do\s+you\s+(?:have|sell|carry))\b",
            ),
            removal: compile(
                r"(?:\b(?:don't|dont|do\s+not|no\s+longer)\s+(?:need|want)\s+|\b(?:remove|drop|skip|cancel|forget(?:\s+about)?|exclude)\s+)",
            ),
            clause_end: compile(r"[.!?;]|\bbut\b"),
            conjunction: compile(r"\s*(?:,\s*(?:(?:and|or)\b)?|&|\band\b|\bor\b)\s*"),
            plural_reference: compile(r"\b(?:both|them|all\s+of\s+them|all\s+three|all\s+two|these|those|everything)\b"),
            pronoun_reference: compile(
                r"\b(?:it|this|that|this\s+one|that\s+one|this\s+product|that\s+product|the\s+product|the\s+same)\b",
            ),
        }
    }
}

/// Deterministic, regex-driven classifier
pub struct RuleClassifier {
    grammar: ConfirmationGrammar,
    patterns: StagePatterns,
    matcher: ProductMatcher,
}

impl RuleClassifier {
    pub fn new() -> Self {
        Self {
            grammar: ConfirmationGrammar::new(),
            patterns: StagePatterns::new(),
            matcher: ProductMatcher::new(),
        }
    }

    pub fn grammar(&self) -> &ConfirmationGrammar {
        &self.grammar
    }

    pub fn matcher(&self) -> &ProductMatcher {
        &self.matcher
    }

    /// Negation targets in `text`. A coordinated object ("the shampoo and
    /// the perfume") yields one removal per product.
    pub fn removals(&self, text: &str) -> Vec<Removal> {
        let mut removals = Vec::new();

        for head in self.patterns.removal.find_iter(text) {
            let span_end = self
                .patterns
                .clause_end
                .find_at(text, head.end())
                .map_or(text.len(), |m| m.start());
            let span = &text[head.end()..span_end];

            let mut parts = Vec::new();
            let mut from = 0;
            for sep in self.patterns.conjunction.find_iter(span) {
                parts.push((from, sep.start()));
                from = sep.end();
            }
            parts.push((from, span.len()));

            for (idx, (start, end)) in parts.into_iter().enumerate() {
                let target = strip_trailers(&span[start..end]);
                let lower = target.to_lowercase();
                if idx == 0 {
                    // "don't want to buy it" is a declined purchase, not a removal
                    if target.is_empty() || lower.starts_with("to ") || lower == "to" {
                        break;
                    }
                } else if target.is_empty() {
                    continue;
                } else if starts_clause(&lower) {
                    break;
                }

                let phrase_start = if idx == 0 { head.start() } else { head.end() + start };
                removals.push(Removal {
                    phrase: text[phrase_start..head.end() + end].trim().to_string(),
                    target: target.to_string(),
                });
            }
        }

        removals
    }

    pub fn reference(&self, text: &str) -> Reference {
        if self.patterns.plural_reference.is_match(text) {
            Reference::All
        } else if self.patterns.pronoun_reference.is_match(text) {
            Reference::Pronoun
        } else {
            Reference::None
        }
    }

    /// Rule based verdict, no I/O
    pub fn classify(&self, history: &[Message], text: &str) -> TurnClassification {
        let text = &normalize_apostrophes(text);
        let object = self.grammar.confirmation(text);
        let confirmed = object.is_some();
        let removals = self.removals(text);
        let p = &self.patterns;

        let (stage, confidence) = if confirmed {
            (Some(SalesStage::ExplicitConfirmation), 0.9)
        } else if !removals.is_empty() || p.objection.is_match(text) || self.grammar.negations.is_match(text) {
            (Some(SalesStage::Evaluation), 0.75)
        } else if p.price.is_match(text) {
            (Some(SalesStage::PriceDisclosure), 0.8)
        } else if p.discovery.is_match(text) {
            (Some(SalesStage::ProductDiscovery), 0.7)
        } else if p.interest.is_match(text) {
            (Some(SalesStage::Interest), 0.7)
        } else if p.greeting.is_match(text) && history.is_empty() {
            (Some(SalesStage::Greeting), 0.8)
        } else {
            (None, 0.5)
        };

        TurnClassification {
            stage,
            confirmed,
            object,
            reference: self.reference(text),
            removals,
            confidence,
        }
    }
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SalesClassifier for RuleClassifier {
    async fn resolve_products(
        &self,
        text: &str,
        catalog: &[CatalogProduct],
    ) -> Result<Vec<ProductRef>, ClassifierError> {
        Ok(self.matcher.resolve(text, catalog))
    }

    async fn classify_turn(
        &self,
        history: &[Message],
        text: &str,
    ) -> Result<TurnClassification, ClassifierError> {
        Ok(self.classify(history, text))
    }

    fn name(&self) -> &'static str {
        "rules"
    }
}

pub(crate) fn normalize_apostrophes(text: &str) -> String {
    text.replace(['\u{2019}', '\u{2018}'], "'")
}

/// Words that open a new clause rather than name another product
const CLAUSE_STARTERS: &[&str] = &[
    "i", "i'm", "i'll", "i'd", "i've", "we", "you", "it", "it's", "that's", "keep", "please", "just", "want",
    "need", "give", "show", "tell", "what", "how", "can", "could", "will", "would", "let", "also", "then",
    "still", "add", "get", "send", "is", "are", "do",
];

/// Trailing words after a removal target
const REMOVAL_TRAILERS: &[&str] = &["anymore", "any more", "after all", "please", "now"];

fn starts_clause(part: &str) -> bool {
    part.split_whitespace()
        .next()
        .is_some_and(|word| CLAUSE_STARTERS.contains(&word))
}

fn strip_trailers(part: &str) -> &str {
    let mut target = part.trim();
    'strip: loop {
        for trailer in REMOVAL_TRAILERS {
            let Some(cut) = target.len().checked_sub(trailer.len()) else {
                continue;
            };
            let (Some(head), Some(tail)) = (target.get(..cut), target.get(cut..)) else {
                continue;
            };
            if tail.eq_ignore_ascii_case(trailer) && (head.is_empty() || head.ends_with(char::is_whitespace)) {
                target = head.trim_end();
                continue 'strip;
            }
        }
        return target;
    }
}

pub(crate) fn is_pronoun(target: &str) -> bool {
    matches!(
        target.trim().to_lowercase().as_str(),
        "it" | "this" | "that" | "this one" | "that one" | "this product" | "that product" | "the product" | "them"
    )
}
