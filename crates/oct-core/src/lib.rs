//! Core domain model and subscription matching for the outlet catalog tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "oct-core";

/// Canonical persisted catalog item, keyed by the externally-assigned sku.
///
/// `first_seen_at` is stamped on insert and never modified afterwards; every
/// other field is overwritten on each observation carrying the same sku.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub sku: String,
    pub name: String,
    pub brand: String,
    pub outlet_price: Option<f64>,
    pub original_price: Option<f64>,
    pub href: String,
    pub image_url: String,
    pub b_grade: bool,
    pub bullet_points: Vec<String>,
    pub category: String,
    pub store_stock: Option<serde_json::Value>,
    pub buyable_online: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// One normalized observation of a catalog item, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDraft {
    pub sku: String,
    pub name: String,
    pub brand: String,
    pub outlet_price: Option<f64>,
    pub original_price: Option<f64>,
    pub href: String,
    pub image_url: String,
    pub b_grade: bool,
    pub bullet_points: Vec<String>,
    pub category: String,
    pub store_stock: Option<serde_json::Value>,
    pub buyable_online: bool,
}

impl ProductDraft {
    /// Promote a draft into a stored product with store-assigned timestamps.
    pub fn into_product(
        self,
        first_seen_at: DateTime<Utc>,
        last_updated_at: DateTime<Utc>,
    ) -> Product {
        Product {
            sku: self.sku,
            name: self.name,
            brand: self.brand,
            outlet_price: self.outlet_price,
            original_price: self.original_price,
            href: self.href,
            image_url: self.image_url,
            b_grade: self.b_grade,
            bullet_points: self.bullet_points,
            category: self.category,
            store_stock: self.store_stock,
            buyable_online: self.buyable_online,
            first_seen_at,
            last_updated_at,
        }
    }
}

/// A stored query a user wants matched against newly discovered products.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub query: String,
    pub min_discount_percent: f64,
    pub buyable_online_only: bool,
    pub created_at: DateTime<Utc>,
}

/// Contact identity a notification is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: Uuid,
    pub email: String,
}

/// Terminal outcome of one sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Immutable record of one sync cycle. `error` is present only on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub total_products: i64,
    pub new_products: i64,
    pub removed_products: i64,
    pub error: Option<String>,
}

/// Percentage discount of the outlet price relative to the original price.
///
/// `None` when either price is missing or the original price is not positive,
/// in which case no discount threshold can be satisfied.
pub fn discount_percent(product: &Product) -> Option<f64> {
    let original = product.original_price?;
    if original <= 0.0 {
        return None;
    }
    let outlet = product.outlet_price?;
    Some((1.0 - outlet / original) * 100.0)
}

/// Whether a single product satisfies a subscription's query and filters.
///
/// Every whitespace token of the query must appear in `name + " " + brand`
/// (case-insensitive, conjunctive). An empty query matches everything. The
/// discount threshold is inclusive at the boundary.
pub fn subscription_matches(subscription: &Subscription, product: &Product) -> bool {
    let haystack = format!("{} {}", product.name, product.brand).to_lowercase();
    let query = subscription.query.to_lowercase();
    if !query.split_whitespace().all(|term| haystack.contains(term)) {
        return false;
    }

    if subscription.buyable_online_only && !product.buyable_online {
        return false;
    }

    if subscription.min_discount_percent > 0.0 {
        match discount_percent(product) {
            Some(discount) if discount >= subscription.min_discount_percent => {}
            _ => return false,
        }
    }

    true
}

/// Products from the newly inserted set matching one subscription.
pub fn matching_products<'a>(
    subscription: &Subscription,
    new_products: &'a [Product],
) -> Vec<&'a Product> {
    new_products
        .iter()
        .filter(|product| subscription_matches(subscription, product))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mk_product(name: &str, brand: &str, outlet: Option<f64>, original: Option<f64>) -> Product {
        let seen = Utc.with_ymd_and_hms(2026, 7, 1, 8, 0, 0).single().unwrap();
        Product {
            sku: "123456".to_string(),
            name: name.to_string(),
            brand: brand.to_string(),
            outlet_price: outlet,
            original_price: original,
            href: "/product/123456".to_string(),
            image_url: String::new(),
            b_grade: false,
            bullet_points: vec![],
            category: String::new(),
            store_stock: None,
            buyable_online: true,
            first_seen_at: seen,
            last_updated_at: seen,
        }
    }

    fn mk_subscription(query: &str, min_discount: f64, online_only: bool) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            query: query.to_string(),
            min_discount_percent: min_discount,
            buyable_online_only: online_only,
            created_at: Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).single().unwrap(),
        }
    }

    #[test]
    fn query_tokens_are_conjunctive() {
        let sub = mk_subscription("sony tv", 0.0, false);
        assert!(subscription_matches(&sub, &mk_product("Sony TV 55", "Sony", None, None)));
        assert!(!subscription_matches(&sub, &mk_product("Sony Soundbar", "Sony", None, None)));
    }

    #[test]
    fn query_matches_across_name_and_brand() {
        let sub = mk_subscription("lg oled", 0.0, false);
        assert!(subscription_matches(&sub, &mk_product("OLED55C4", "LG", None, None)));
    }

    #[test]
    fn empty_query_matches_everything() {
        let sub = mk_subscription("", 0.0, false);
        assert!(subscription_matches(&sub, &mk_product("Anything", "Anyone", None, None)));
    }

    #[test]
    fn discount_boundary_is_inclusive() {
        let sub = mk_subscription("", 20.0, false);
        assert!(subscription_matches(&sub, &mk_product("TV", "Sony", Some(80.0), Some(100.0))));
        assert!(!subscription_matches(&sub, &mk_product("TV", "Sony", Some(81.0), Some(100.0))));
    }

    #[test]
    fn zero_original_price_never_clears_a_threshold() {
        let sub = mk_subscription("", 10.0, false);
        assert!(!subscription_matches(&sub, &mk_product("TV", "Sony", Some(1.0), Some(0.0))));
        assert!(!subscription_matches(&sub, &mk_product("TV", "Sony", Some(1.0), None)));
    }

    #[test]
    fn missing_outlet_price_never_clears_a_threshold() {
        let sub = mk_subscription("", 10.0, false);
        assert!(!subscription_matches(&sub, &mk_product("TV", "Sony", None, Some(100.0))));
    }

    #[test]
    fn threshold_of_zero_ignores_prices() {
        let sub = mk_subscription("tv", 0.0, false);
        assert!(subscription_matches(&sub, &mk_product("TV", "Sony", None, None)));
    }

    #[test]
    fn buyable_online_filter_gates_offline_products() {
        let sub = mk_subscription("", 0.0, true);
        let mut product = mk_product("TV", "Sony", None, None);
        product.buyable_online = false;
        assert!(!subscription_matches(&sub, &product));
        product.buyable_online = true;
        assert!(subscription_matches(&sub, &product));
    }

    #[test]
    fn matching_products_filters_the_new_set() {
        let sub = mk_subscription("sony", 0.0, false);
        let products = vec![
            mk_product("Sony TV", "Sony", None, None),
            mk_product("Toaster", "Philips", None, None),
        ];
        let matched = matching_products(&sub, &products);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "Sony TV");
    }
}
