//! Free text to catalog product resolution
//!
//! Matching is layered:
//! 1. exact, case-insensitive catalog name anywhere in the text
//! 2. token overlap between a mention segment and a product's
//!    name/category/tags, using tokens longer than three characters
//!
//! A message is split into mention segments ("perfume, face wash, and
//! shampoo") and each segment resolves to at most one product, so listing
//! several categories yields one product per category.

use std::cmp::Reverse;
use std::collections::HashSet;

use serde::Serialize;

use super::catalog::CatalogProduct;
use crate::conversation::ProductRef;

/// Words that carry no product meaning in a shopping conversation
const STOP_WORDS: &[&str] = &[
    "about", "actually", "also", "anymore", "anything", "around", "available", "awesome", "both", "buying",
    "can't", "cheap", "cheaper", "confirm", "cost", "costs", "could", "does", "doesn't", "don't", "each",
    "else", "expensive", "fine", "from", "give", "good", "great", "have", "hello", "help", "here", "i'll", "i've", "interested",
    "just", "know", "like", "little", "look", "looking", "love", "many", "maybe", "more", "much", "need",
    "nice", "okay", "order", "other", "perfect", "please", "price", "prices", "pricing", "product", "products",
    "purchase", "really", "reasonable", "recommend", "seem", "seems", "should", "show", "some", "something",
    "sound", "sounds", "sure", "take", "tell", "than", "thank", "thanks", "that", "that's", "their", "them",
    "then", "there", "these", "they", "thing", "things", "think", "this", "those", "want", "wanted", "what",
    "what's", "when", "where", "which", "will", "with", "would", "yeah", "your", "item", "items", "one's",
];

/// Text separators between independent product mentions
const SEGMENT_SEPARATORS: &[&str] = &[" and ", " plus ", " also ", " or ", " as well as ", " along with "];

/// A product with its relevance for a query
#[derive(Debug, Clone, Serialize)]
pub struct ScoredProduct {
    pub product: CatalogProduct,
    pub score: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ProductMatcher;

impl ProductMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Resolve every product mentioned in `text`. Ties go to the product that
    /// comes first in `catalog`.
    pub fn resolve(&self, text: &str, catalog: &[CatalogProduct]) -> Vec<ProductRef> {
        let mut remaining = text.to_lowercase();
        let mut matched: Vec<&CatalogProduct> = Vec::new();

        for product in catalog {
            let name = product.name.to_lowercase();
            if !name.is_empty() && remaining.contains(&name) {
                remaining = remaining.replace(&name, " , ");
                matched.push(product);
            }
        }

        for segment in split_segments(&remaining) {
            let segment_tokens = tokens(&segment);
            if segment_tokens.is_empty() {
                continue;
            }

            let best = catalog
                .iter()
                .enumerate()
                .map(|(idx, product)| (overlap(&segment_tokens, product), idx, product))
                .filter(|(score, _, _)| *score > 0)
                .max_by_key(|(score, idx, _)| (*score, Reverse(*idx)));

            if let Some((score, _, product)) = best {
                if !matched.iter().any(|m| m.id == product.id) {
                    tracing::debug!(segment = %segment, product = %product.name, score, "Token overlap match");
                    matched.push(product);
                }
            }
        }

        matched.into_iter().map(CatalogProduct::to_ref).collect()
    }

    /// Score every product against `text`, best first. An empty query
    /// returns the catalog in order.
    pub fn rank(&self, text: &str, catalog: &[CatalogProduct]) -> Vec<ScoredProduct> {
        let lower = text.to_lowercase();
        let query_tokens = tokens(&lower);

        if query_tokens.is_empty() {
            return catalog
                .iter()
                .map(|p| ScoredProduct {
                    product: p.clone(),
                    score: 0,
                })
                .collect();
        }

        let mut scored: Vec<(usize, ScoredProduct)> = catalog
            .iter()
            .enumerate()
            .filter_map(|(idx, product)| {
                let exact = if lower.contains(&product.name.to_lowercase()) { 10 } else { 0 };
                let score = exact + overlap(&query_tokens, product);
                (score > 0).then(|| {
                    (
                        idx,
                        ScoredProduct {
                            product: product.clone(),
                            score,
                        },
                    )
                })
            })
            .collect();

        scored.sort_by_key(|(idx, s)| (Reverse(s.score), *idx));
        scored.into_iter().map(|(_, s)| s).collect()
    }

    /// Whether `text` talks about `product` by name or category
    pub fn mentions(&self, text: &str, product: &ProductRef) -> bool {
        let lower = text.to_lowercase();
        let name = product.display_name.to_lowercase();
        let category = product.category.to_lowercase();

        if lower.contains(&name) || (!category.is_empty() && lower.contains(&category)) {
            return true;
        }

        let text_tokens = tokens(&lower);
        tokens(&name).iter().any(|t| text_tokens.contains(t))
    }
}

fn split_segments(text: &str) -> Vec<String> {
    let mut normalized = text.replace([',', ';', '&', '/', '\n'], " , ");
    for sep in SEGMENT_SEPARATORS {
        normalized = normalized.replace(sep, " , ");
    }

    normalized
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Lowercased content tokens longer than three characters, plurals folded
fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| t.chars().count() > 3 && !STOP_WORDS.contains(t))
        .map(singular)
        .collect()
}

fn singular(token: &str) -> String {
    if token.len() > 4 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

fn overlap(query: &HashSet<String>, product: &CatalogProduct) -> u32 {
    let mut product_tokens = tokens(&product.name);
    product_tokens.extend(tokens(&product.category));
    for tag in &product.tags {
        product_tokens.extend(tokens(tag));
    }

    query.iter().filter(|t| product_tokens.contains(*t)).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(idx: u8, name: &str, category: &str, tags: &[&str]) -> CatalogProduct {
        CatalogProduct {
            id: format!("00000000-0000-4000-8000-0000000000{:02}", idx),
            name: name.to_string(),
            category: category.to_string(),
            description: String::new(),
            price: 100.0 + f64::from(idx),
            sale_price: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            stock_count: 10,
            is_active: true,
        }
    }

    fn catalog() -> Vec<CatalogProduct> {
        vec![
            product(1, "Wild Stone Perfume", "perfume", &["fragrance", "woody"]),
            product(2, "Himalaya Neem Face Wash", "face wash", &["neem", "cleanser"]),
            product(3, "Pantene Silky Smooth Shampoo", "shampoo", &["frizz control", "smooth hair"]),
            product(4, "Sunsilk Hair Fall Shampoo", "shampoo", &["hair fall", "keratin"]),
            product(5, "Rasasi Attar", "perfume", &["arabic perfume", "oud"]),
        ]
    }

    fn names(refs: &[ProductRef]) -> Vec<&str> {
        refs.iter().map(|r| r.display_name.as_str()).collect()
    }

    #[test]
    fn test_multiple_categories_resolve_individually() {
        let matcher = ProductMatcher::new();
        let refs = matcher.resolve("I need perfume, face wash, and shampoo", &catalog());

        assert_eq!(
            names(&refs),
            vec!["Wild Stone Perfume", "Himalaya Neem Face Wash", "Pantene Silky Smooth Shampoo"]
        );
    }

    #[test]
    fn test_exact_name_beats_token_overlap() {
        let matcher = ProductMatcher::new();
        let refs = matcher.resolve("How much is the Sunsilk Hair Fall Shampoo?", &catalog());

        assert_eq!(names(&refs), vec!["Sunsilk Hair Fall Shampoo"]);
    }

    #[test]
    fn test_overlap_prefers_most_shared_tokens() {
        let matcher = ProductMatcher::new();
        let refs = matcher.resolve("something with keratin for hair fall", &catalog());

        assert_eq!(names(&refs), vec!["Sunsilk Hair Fall Shampoo"]);
    }

    #[test]
    fn test_ties_follow_catalog_order() {
        let matcher = ProductMatcher::new();
        let mut reordered = catalog();
        reordered.swap(2, 3);

        let refs = matcher.resolve("shampoo", &reordered);
        assert_eq!(names(&refs), vec!["Sunsilk Hair Fall Shampoo"]);
    }

    #[test]
    fn test_chatter_resolves_nothing() {
        let matcher = ProductMatcher::new();
        for text in ["What are the prices?", "Yes, I'll take both", "That sounds good", "I'm interested"] {
            assert!(matcher.resolve(text, &catalog()).is_empty(), "{}", text);
        }
    }

    #[test]
    fn test_rank_orders_by_score() {
        let matcher = ProductMatcher::new();
        let ranked = matcher.rank("arabic oud perfume", &catalog());

        assert_eq!(ranked[0].product.name, "Rasasi Attar");
        assert_eq!(ranked[0].score, 2);
        assert_eq!(ranked[1].product.name, "Wild Stone Perfume");

        assert_eq!(matcher.rank("", &catalog()).len(), 5);
    }

    #[test]
    fn test_mentions_by_category_or_name_token() {
        let matcher = ProductMatcher::new();
        let perfume = catalog()[0].to_ref();

        assert!(matcher.mentions("Tell me about the perfume", &perfume));
        assert!(matcher.mentions("is wild stone any good?", &perfume));
        assert!(!matcher.mentions("what about shampoo", &perfume));
    }
}
