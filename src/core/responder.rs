//! Template response composer
//!
//! Builds the customer-facing reply for a turn and reports which prices it
//! showed, so the engine can record them as disclosed. Prices are only shown
//! when the customer asks for them or when a confirmation is blocked by
//! prices they have not seen yet.

use super::catalog::CatalogProduct;
use super::gate::Readiness;
use super::tracker::InterestTracker;
use crate::conversation::{ProductRef, SalesStage};

/// Everything the composer needs to know about the turn
pub struct ReplyContext<'a> {
    pub stage: SalesStage,
    /// The message had nothing to do with shopping
    pub off_topic: bool,
    pub readiness: &'a Readiness,
    pub tracker: &'a InterestTracker,
    pub added: &'a [ProductRef],
    pub removed: &'a [ProductRef],
    pub catalog: &'a [CatalogProduct],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    /// Product ids whose price appears in `text`
    pub disclosed: Vec<String>,
}

pub struct ResponseComposer {
    agent_name: String,
    currency: String,
}

impl ResponseComposer {
    pub fn new(agent_name: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            currency: currency.into(),
        }
    }

    pub fn compose(&self, ctx: &ReplyContext<'_>) -> Reply {
        let mut parts = Vec::new();
        let mut disclosed = Vec::new();

        if !ctx.removed.is_empty() {
            parts.push(format!("No problem, I've removed {} from your list.", names(ctx.removed)));
        }

        match ctx.readiness {
            Readiness::Ready => {
                let tracked: Vec<&ProductRef> = ctx.tracker.tracked_products.iter().collect();
                parts.push("Wonderful! Here's your order:".to_string());
                parts.push(self.price_list(&tracked, ctx.catalog, &mut disclosed));
                parts.push("A member of our team will contact you shortly to arrange payment and delivery.".to_string());
            }
            Readiness::PricesPending(ids) => {
                let pending: Vec<&ProductRef> = ctx
                    .tracker
                    .tracked_products
                    .iter()
                    .filter(|p| ids.contains(&p.product_id))
                    .collect();
                parts.push("Before I place the order, here are the prices:".to_string());
                parts.push(self.price_list(&pending, ctx.catalog, &mut disclosed));
                parts.push("Would you like to go ahead with the order?".to_string());
            }
            Readiness::NoProducts => {
                parts.push(format!(
                    "I'd be happy to take your order! Which product would you like to buy? We carry {}.",
                    categories(ctx.catalog)
                ));
            }
            Readiness::NotConfirmed => self.stage_reply(ctx, &mut parts, &mut disclosed),
        }

        Reply {
            text: parts.join("\n"),
            disclosed,
        }
    }

    fn stage_reply(&self, ctx: &ReplyContext<'_>, parts: &mut Vec<String>, disclosed: &mut Vec<String>) {
        let tracked = &ctx.tracker.tracked_products;

        if ctx.off_topic {
            if tracked.is_empty() {
                parts.push(format!(
                    "I'm here to help you shop for {}. What are you looking for today?",
                    categories(ctx.catalog)
                ));
            } else {
                parts.push(format!(
                    "I can only help with shopping, I'm afraid. Shall we continue with {}?",
                    names(tracked)
                ));
            }
            return;
        }

        match ctx.stage {
            SalesStage::Greeting if tracked.is_empty() => {
                parts.push(format!(
                    "Hello! Welcome, I'm {}. We carry {}. What are you looking for today?",
                    self.agent_name,
                    categories(ctx.catalog)
                ));
            }
            SalesStage::PriceDisclosure if !tracked.is_empty() => {
                let all: Vec<&ProductRef> = tracked.iter().collect();
                parts.push("Here are the prices:".to_string());
                parts.push(self.price_list(&all, ctx.catalog, disclosed));
                parts.push("Let me know if you'd like to order.".to_string());
            }
            SalesStage::PriceDisclosure => {
                parts.push("Which product would you like a price for?".to_string());
            }
            SalesStage::Evaluation | SalesStage::ExplicitConfirmation => {
                if !ctx.removed.is_empty() {
                    if tracked.is_empty() {
                        parts.push("Is there anything else you're looking for?".to_string());
                    } else {
                        parts.push(format!("You still have {} in your list.", names(tracked)));
                    }
                } else if tracked.is_empty() {
                    parts.push(format!(
                        "Take your time. We carry {}, tell me what you need and I'll suggest something.",
                        categories(ctx.catalog)
                    ));
                } else if ctx.tracker.all_prices_disclosed() {
                    parts.push(format!(
                        "Take your time. {} {} a popular choice with our customers. Just tell me when you'd like to order.",
                        names(tracked),
                        if tracked.len() == 1 { "is" } else { "are" }
                    ));
                } else {
                    parts.push(format!(
                        "Take your time. Would you like to hear the prices for {}?",
                        names(tracked)
                    ));
                }
            }
            _ => {
                let shown = if ctx.added.is_empty() { tracked.as_slice() } else { ctx.added };
                if shown.is_empty() {
                    parts.push(format!(
                        "I couldn't find that in our catalog. We carry {}. Which one are you looking for?",
                        categories(ctx.catalog)
                    ));
                } else {
                    parts.push(self.introduce(shown, ctx.catalog));
                    parts.push("Would you like to know the prices?".to_string());
                }
            }
        }
    }

    fn introduce(&self, products: &[ProductRef], catalog: &[CatalogProduct]) -> String {
        let lines: Vec<String> = products
            .iter()
            .map(|p| match catalog.iter().find(|c| c.id == p.product_id) {
                Some(c) if !c.description.is_empty() => format!("- {}: {}", p.display_name, c.description),
                _ => format!("- {}", p.display_name),
            })
            .collect();
        format!("Great, here's what I found for you:\n{}", lines.join("\n"))
    }

    /// One line per product. Only prices that could be looked up are
    /// reported as disclosed.
    fn price_list(&self, products: &[&ProductRef], catalog: &[CatalogProduct], disclosed: &mut Vec<String>) -> String {
        products
            .iter()
            .map(|p| match catalog.iter().find(|c| c.id == p.product_id) {
                Some(c) => {
                    disclosed.push(p.product_id.clone());
                    match c.sale_price {
                        Some(sale) => format!(
                            "- {}: {} (regular {})",
                            p.display_name,
                            self.money(sale),
                            self.money(c.price)
                        ),
                        None => format!("- {}: {}", p.display_name, self.money(c.price)),
                    }
                }
                None => format!("- {}: price currently unavailable", p.display_name),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn money(&self, amount: f64) -> String {
        if amount.fract() == 0.0 {
            format!("{} {:.0}", self.currency, amount)
        } else {
            format!("{} {:.2}", self.currency, amount)
        }
    }
}

fn names(products: &[ProductRef]) -> String {
    let names: Vec<&str> = products.iter().map(|p| p.display_name.as_str()).collect();
    match names.as_slice() {
        [] => String::new(),
        [single] => single.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

fn categories(catalog: &[CatalogProduct]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for product in catalog {
        if !seen.iter().any(|c| c.eq_ignore_ascii_case(&product.category)) {
            seen.push(&product.category);
        }
    }
    match seen.as_slice() {
        [] => "beauty and personal care products".to_string(),
        [single] => single.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<CatalogProduct> {
        vec![
            CatalogProduct {
                id: "p1".into(),
                name: "Wild Stone Perfume".into(),
                category: "perfume".into(),
                description: "Long-lasting woody fragrance".into(),
                price: 450.0,
                sale_price: None,
                tags: vec![],
                stock_count: 5,
                is_active: true,
            },
            CatalogProduct {
                id: "p2".into(),
                name: "Himalaya Neem Face Wash".into(),
                category: "face wash".into(),
                description: String::new(),
                price: 180.0,
                sale_price: Some(165.5),
                tags: vec![],
                stock_count: 5,
                is_active: true,
            },
        ]
    }

    fn tracker(catalog: &[CatalogProduct]) -> InterestTracker {
        let mut tracker = InterestTracker::default();
        tracker.add(catalog.iter().map(CatalogProduct::to_ref));
        tracker
    }

    fn ctx<'a>(
        stage: SalesStage,
        readiness: &'a Readiness,
        tracker: &'a InterestTracker,
        catalog: &'a [CatalogProduct],
    ) -> ReplyContext<'a> {
        ReplyContext {
            stage,
            off_topic: false,
            readiness,
            tracker,
            added: &[],
            removed: &[],
            catalog,
        }
    }

    #[test]
    fn test_price_question_discloses_every_tracked_price() {
        let catalog = catalog();
        let tracker = tracker(&catalog);
        let composer = ResponseComposer::new("Mira", "BDT");

        let reply = composer.compose(&ctx(SalesStage::PriceDisclosure, &Readiness::NotConfirmed, &tracker, &catalog));
        assert!(reply.text.contains("Wild Stone Perfume: BDT 450"));
        assert!(reply.text.contains("BDT 165.50 (regular BDT 180)"));
        assert_eq!(reply.disclosed, vec!["p1", "p2"]);
    }

    #[test]
    fn test_introductions_never_show_prices() {
        let catalog = catalog();
        let tracker = tracker(&catalog);
        let composer = ResponseComposer::new("Mira", "BDT");

        let reply = composer.compose(&ctx(SalesStage::Interest, &Readiness::NotConfirmed, &tracker, &catalog));
        assert!(reply.text.contains("Wild Stone Perfume"));
        assert!(!reply.text.contains("BDT"));
        assert!(reply.disclosed.is_empty());
    }

    #[test]
    fn test_blocked_confirmation_shows_pending_prices() {
        let catalog = catalog();
        let tracker = tracker(&catalog);
        let composer = ResponseComposer::new("Mira", "BDT");
        let readiness = Readiness::PricesPending(vec!["p2".into()]);

        let reply = composer.compose(&ctx(SalesStage::ExplicitConfirmation, &readiness, &tracker, &catalog));
        assert_eq!(reply.disclosed, vec!["p2"]);
        assert!(reply.text.contains("go ahead"));
    }

    #[test]
    fn test_confirmation_without_target_asks_which_product() {
        let catalog = catalog();
        let tracker = InterestTracker::default();
        let composer = ResponseComposer::new("Mira", "BDT");

        let reply = composer.compose(&ctx(SalesStage::ExplicitConfirmation, &Readiness::NoProducts, &tracker, &catalog));
        assert!(reply.text.contains("Which product would you like to buy?"));
        assert!(reply.text.contains("perfume and face wash"));
    }

    #[test]
    fn test_off_topic_steers_back() {
        let catalog = catalog();
        let tracker = tracker(&catalog);
        let composer = ResponseComposer::new("Mira", "BDT");

        let mut context = ctx(SalesStage::Interest, &Readiness::NotConfirmed, &tracker, &catalog);
        context.off_topic = true;
        let reply = composer.compose(&context);
        assert!(reply.text.contains("Wild Stone Perfume and Himalaya Neem Face Wash"));
    }
}
