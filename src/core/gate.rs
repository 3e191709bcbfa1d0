//! Purchase readiness gate

use serde::Serialize;

use super::tracker::InterestTracker;

/// Outcome of the readiness check for one turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "pending", rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    NotConfirmed,
    NoProducts,
    /// Confirmed, but these tracked products were never priced for the customer
    PricesPending(Vec<String>),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Ready iff the customer confirmed this turn, at least one product is
/// tracked, and every tracked product's price has been shown before.
///
/// Pure; evaluated fresh every turn so a previous `Ready` never carries over.
pub fn evaluate(confirmed: bool, tracker: &InterestTracker) -> Readiness {
    if !confirmed {
        return Readiness::NotConfirmed;
    }
    if tracker.is_empty() {
        return Readiness::NoProducts;
    }

    let pending: Vec<String> = tracker
        .undisclosed()
        .into_iter()
        .map(|p| p.product_id.clone())
        .collect();

    if pending.is_empty() {
        Readiness::Ready
    } else {
        Readiness::PricesPending(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ProductRef;

    fn tracker_with(ids: &[&str]) -> InterestTracker {
        let mut tracker = InterestTracker::default();
        tracker.add(ids.iter().map(|id| ProductRef {
            product_id: id.to_string(),
            display_name: format!("Product {}", id),
            category: "misc".into(),
        }));
        tracker
    }

    #[test]
    fn test_requires_confirmation() {
        let mut tracker = tracker_with(&["a"]);
        tracker.disclose_price("a");
        assert_eq!(evaluate(false, &tracker), Readiness::NotConfirmed);
        assert!(evaluate(true, &tracker).is_ready());
    }

    #[test]
    fn test_requires_products() {
        assert_eq!(evaluate(true, &InterestTracker::default()), Readiness::NoProducts);
    }

    #[test]
    fn test_requires_every_price() {
        let mut tracker = tracker_with(&["a", "b"]);
        tracker.disclose_price("a");
        assert_eq!(evaluate(true, &tracker), Readiness::PricesPending(vec!["b".into()]));

        tracker.disclose_price("b");
        assert_eq!(evaluate(true, &tracker), Readiness::Ready);
    }
}
