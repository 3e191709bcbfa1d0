//! Product interest tracking
//!
//! Keeps the set of products a customer is currently interested in, and the
//! subset whose price has already been shown to them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::conversation::ProductRef;

/// Articles and determiners dropped from the front of a removal target
const LEADING_DETERMINERS: &[&str] = &["the ", "a ", "an ", "my ", "that ", "this ", "those ", "these ", "any "];

/// Tracked products plus the prices disclosed for them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterestTracker {
    #[serde(default)]
    pub tracked_products: Vec<ProductRef>,

    /// Only grows; cleared together with the whole conversation
    #[serde(default)]
    pub prices_disclosed: BTreeSet<String>,
}

/// What the caller sees of the tracker after a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterestSnapshot {
    pub product_ids: Vec<String>,
    pub product_interested: String,
}

impl InterestTracker {
    /// Union `products` into the tracked set. Returns the newly tracked ones.
    pub fn add(&mut self, products: impl IntoIterator<Item = ProductRef>) -> Vec<ProductRef> {
        let mut added = Vec::new();
        for product in products {
            if self.contains(&product.product_id) {
                continue;
            }
            tracing::debug!(product_id = %product.product_id, name = %product.display_name, "Tracking product");
            self.tracked_products.push(product.clone());
            added.push(product);
        }
        added
    }

    /// Drop every tracked product whose name or category matches `target`.
    /// Returns the removed products; an unknown target removes nothing.
    pub fn remove(&mut self, target: &str) -> Vec<ProductRef> {
        let target = normalize_target(target);
        if target.len() < 3 {
            return Vec::new();
        }

        let (removed, kept): (Vec<_>, Vec<_>) = self
            .tracked_products
            .drain(..)
            .partition(|p| matches_target(p, &target));
        self.tracked_products = kept;

        if !removed.is_empty() {
            tracing::debug!(target = %target, count = removed.len(), "Removed tracked products");
        }
        removed
    }

    /// Drop a single product by id
    pub fn remove_id(&mut self, product_id: &str) -> Option<ProductRef> {
        let idx = self.tracked_products.iter().position(|p| p.product_id == product_id)?;
        Some(self.tracked_products.remove(idx))
    }

    pub fn disclose_price(&mut self, product_id: &str) {
        self.prices_disclosed.insert(product_id.to_string());
    }

    pub fn contains(&self, product_id: &str) -> bool {
        self.tracked_products.iter().any(|p| p.product_id == product_id)
    }

    pub fn is_empty(&self) -> bool {
        self.tracked_products.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracked_products.len()
    }

    /// Tracked products whose price the customer has not seen yet
    pub fn undisclosed(&self) -> Vec<&ProductRef> {
        self.tracked_products
            .iter()
            .filter(|p| !self.prices_disclosed.contains(&p.product_id))
            .collect()
    }

    pub fn all_prices_disclosed(&self) -> bool {
        self.undisclosed().is_empty()
    }

    pub fn snapshot(&self) -> InterestSnapshot {
        let product_ids = self
            .tracked_products
            .iter()
            .map(|p| p.product_id.clone())
            .collect();

        let names: Vec<&str> = self
            .tracked_products
            .iter()
            .map(|p| p.display_name.as_str())
            .collect();

        let product_interested = match names.as_slice() {
            [] => String::new(),
            [single] => single.to_string(),
            many => format!("Multiple products: {}", many.join(", ")),
        };

        InterestSnapshot {
            product_ids,
            product_interested,
        }
    }
}

fn normalize_target(target: &str) -> String {
    let mut target = target
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();

    loop {
        match LEADING_DETERMINERS.iter().find(|d| target.starts_with(*d)) {
            Some(d) => target = target[d.len()..].trim_start().to_string(),
            None => break,
        }
    }

    for suffix in [" anymore", " any more", " please", " now"] {
        if let Some(stripped) = target.strip_suffix(suffix) {
            target = stripped.trim_end().to_string();
        }
    }

    target
}

fn matches_target(product: &ProductRef, target: &str) -> bool {
    let name = product.display_name.to_lowercase();
    let category = product.category.to_lowercase();

    let singular = target.strip_suffix('s').filter(|s| s.len() > 2);
    let candidates = std::iter::once(target).chain(singular);

    for t in candidates {
        if name.contains(t) {
            return true;
        }
        if !category.is_empty() && (category == t || category.contains(t) || t.contains(category.as_str())) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, name: &str, category: &str) -> ProductRef {
        ProductRef {
            product_id: id.to_string(),
            display_name: name.to_string(),
            category: category.to_string(),
        }
    }

    fn perfume() -> ProductRef {
        product("11111111-1111-4111-8111-111111111111", "Wild Stone Perfume", "perfume")
    }

    fn face_wash() -> ProductRef {
        product("22222222-2222-4222-8222-222222222222", "Himalaya Face Wash", "face wash")
    }

    fn shampoo() -> ProductRef {
        product("33333333-3333-4333-8333-333333333333", "Pantene Pro-V Shampoo", "shampoo")
    }

    #[test]
    fn test_add_is_additive_across_calls() {
        let mut tracker = InterestTracker::default();
        tracker.add([perfume()]);
        tracker.add([face_wash()]);
        tracker.add([shampoo()]);

        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut tracker = InterestTracker::default();
        let first = tracker.add([perfume(), face_wash()]);
        let second = tracker.add([perfume(), face_wash()]);

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(tracker.snapshot().product_ids.len(), 2);
    }

    #[test]
    fn test_remove_by_category_keeps_others() {
        let mut tracker = InterestTracker::default();
        tracker.add([perfume(), face_wash(), shampoo()]);

        let removed = tracker.remove("the shampoo anymore");
        assert_eq!(removed, vec![shampoo()]);

        let ids = tracker.snapshot().product_ids;
        assert_eq!(ids, vec![perfume().product_id, face_wash().product_id]);
    }

    #[test]
    fn test_remove_plural_and_unknown_targets() {
        let mut tracker = InterestTracker::default();
        tracker.add([perfume(), shampoo()]);

        assert!(tracker.remove("toothpaste").is_empty());
        assert!(tracker.remove("").is_empty());
        assert!(tracker.remove("it").is_empty());
        assert_eq!(tracker.len(), 2);

        assert_eq!(tracker.remove("perfumes").len(), 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_snapshot_labels() {
        let mut tracker = InterestTracker::default();
        assert_eq!(tracker.snapshot().product_interested, "");

        tracker.add([perfume()]);
        assert_eq!(tracker.snapshot().product_interested, "Wild Stone Perfume");

        tracker.add([face_wash()]);
        assert_eq!(
            tracker.snapshot().product_interested,
            "Multiple products: Wild Stone Perfume, Himalaya Face Wash"
        );
    }

    #[test]
    fn test_price_disclosure_tracking() {
        let mut tracker = InterestTracker::default();
        tracker.add([perfume(), face_wash()]);
        assert!(!tracker.all_prices_disclosed());

        tracker.disclose_price(&perfume().product_id);
        assert_eq!(tracker.undisclosed(), vec![&face_wash()]);

        tracker.disclose_price(&face_wash().product_id);
        assert!(tracker.all_prices_disclosed());

        // Removing a product does not forget that its price was shown
        tracker.remove("perfume");
        assert!(tracker.prices_disclosed.contains(&perfume().product_id));
    }
}
