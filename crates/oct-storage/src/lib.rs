//! Persistent catalog state: products, subscriptions, run history.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oct_core::{Product, ProductDraft, RunRecord, RunStatus, Subscriber, Subscription};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const CRATE_NAME: &str = "oct-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result of an upsert: the stored row plus whether it was newly inserted.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub product: Product,
    pub inserted: bool,
}

/// A subscription joined to its owner's contact address.
#[derive(Debug, Clone)]
pub struct OwnedSubscription {
    pub subscription: Subscription,
    pub owner: Subscriber,
}

/// Shared mutable catalog state. Correctness of the sync pipeline depends on
/// `upsert_product` being atomic per sku; no multi-record transaction is used.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Upsert one observation keyed by sku. Inserts stamp `first_seen_at` to
    /// `observed_at`; updates overwrite every mutable field and leave
    /// `first_seen_at` untouched.
    async fn upsert_product(
        &self,
        draft: &ProductDraft,
        observed_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Count stored products whose sku is absent from `present_skus`.
    /// Absent products are counted, never deleted.
    async fn count_absent_skus(&self, present_skus: &[String]) -> Result<i64, StoreError>;

    /// All subscriptions joined to their owners' contact addresses.
    async fn subscriptions_with_owners(&self) -> Result<Vec<OwnedSubscription>, StoreError>;

    /// Append one run record. Rows are immutable once written.
    async fn insert_run(&self, run: &RunRecord) -> Result<(), StoreError>;

    /// Most recent run records, newest first.
    async fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>, StoreError>;
}

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn upsert_product(
        &self,
        draft: &ProductDraft,
        observed_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        // Single-statement upsert; `xmax = 0` distinguishes a fresh insert
        // from a conflict update.
        let row = sqlx::query(
            r#"
            INSERT INTO products (
                sku, name, brand, outlet_price, original_price, href, image_url,
                b_grade, bullet_points, category, store_stock, buyable_online,
                first_seen_at, last_updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            ON CONFLICT (sku) DO UPDATE
               SET name = EXCLUDED.name,
                   brand = EXCLUDED.brand,
                   outlet_price = EXCLUDED.outlet_price,
                   original_price = EXCLUDED.original_price,
                   href = EXCLUDED.href,
                   image_url = EXCLUDED.image_url,
                   b_grade = EXCLUDED.b_grade,
                   bullet_points = EXCLUDED.bullet_points,
                   category = EXCLUDED.category,
                   store_stock = EXCLUDED.store_stock,
                   buyable_online = EXCLUDED.buyable_online,
                   last_updated_at = EXCLUDED.last_updated_at
            RETURNING sku, name, brand, outlet_price, original_price, href, image_url,
                      b_grade, bullet_points, category, store_stock, buyable_online,
                      first_seen_at, last_updated_at, (xmax = 0) AS inserted
            "#,
        )
        .bind(&draft.sku)
        .bind(&draft.name)
        .bind(&draft.brand)
        .bind(draft.outlet_price)
        .bind(draft.original_price)
        .bind(&draft.href)
        .bind(&draft.image_url)
        .bind(draft.b_grade)
        .bind(&draft.bullet_points)
        .bind(&draft.category)
        .bind(&draft.store_stock)
        .bind(draft.buyable_online)
        .bind(observed_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(UpsertOutcome {
            inserted: row.try_get("inserted")?,
            product: row_to_product(&row)?,
        })
    }

    async fn count_absent_skus(&self, present_skus: &[String]) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS absent
              FROM products
             WHERE NOT (sku = ANY($1))
            "#,
        )
        .bind(present_skus)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("absent")?)
    }

    async fn subscriptions_with_owners(&self) -> Result<Vec<OwnedSubscription>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.owner_id, s.query, s.min_discount_percent,
                   s.buyable_online_only, s.created_at, u.email
              FROM subscriptions s
              JOIN users u ON u.id = s.owner_id
             ORDER BY s.created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let owner_id: Uuid = row.try_get("owner_id")?;
            out.push(OwnedSubscription {
                subscription: Subscription {
                    id: row.try_get("id")?,
                    owner_id,
                    query: row.try_get("query")?,
                    min_discount_percent: row.try_get("min_discount_percent")?,
                    buyable_online_only: row.try_get("buyable_online_only")?,
                    created_at: row.try_get("created_at")?,
                },
                owner: Subscriber {
                    id: owner_id,
                    email: row.try_get("email")?,
                },
            });
        }
        Ok(out)
    }

    async fn insert_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (
                id, started_at, finished_at, status,
                total_products, new_products, removed_products, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(run.id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.status.as_str())
        .bind(run.total_products)
        .bind(run.new_products)
        .bind(run.removed_products)
        .bind(&run.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, started_at, finished_at, status,
                   total_products, new_products, removed_products, error
              FROM sync_runs
             ORDER BY started_at DESC
             LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_status: String = row.try_get("status")?;
            let status = RunStatus::parse(&raw_status).ok_or_else(|| {
                sqlx::Error::Decode(format!("unknown run status {raw_status}").into())
            })?;
            out.push(RunRecord {
                id: row.try_get("id")?,
                started_at: row.try_get("started_at")?,
                finished_at: row.try_get("finished_at")?,
                status,
                total_products: row.try_get("total_products")?,
                new_products: row.try_get("new_products")?,
                removed_products: row.try_get("removed_products")?,
                error: row.try_get("error")?,
            });
        }
        Ok(out)
    }
}

fn row_to_product(row: &PgRow) -> Result<Product, sqlx::Error> {
    Ok(Product {
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        brand: row.try_get("brand")?,
        outlet_price: row.try_get("outlet_price")?,
        original_price: row.try_get("original_price")?,
        href: row.try_get("href")?,
        image_url: row.try_get("image_url")?,
        b_grade: row.try_get("b_grade")?,
        bullet_points: row.try_get("bullet_points")?,
        category: row.try_get("category")?,
        store_stock: row.try_get("store_stock")?,
        buyable_online: row.try_get("buyable_online")?,
        first_seen_at: row.try_get("first_seen_at")?,
        last_updated_at: row.try_get("last_updated_at")?,
    })
}

/// In-memory store for tests and database-less local runs.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    products: HashMap<String, Product>,
    subscriptions: Vec<OwnedSubscription>,
    runs: Vec<RunRecord>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_subscription(&self, owner: Subscriber, subscription: Subscription) {
        let mut state = self.inner.lock().await;
        state.subscriptions.push(OwnedSubscription {
            subscription,
            owner,
        });
    }

    /// Snapshot of stored products, sorted by sku.
    pub async fn products(&self) -> Vec<Product> {
        let state = self.inner.lock().await;
        let mut products: Vec<Product> = state.products.values().cloned().collect();
        products.sort_by(|a, b| a.sku.cmp(&b.sku));
        products
    }

    /// Snapshot of recorded runs, in insertion order.
    pub async fn runs(&self) -> Vec<RunRecord> {
        self.inner.lock().await.runs.clone()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn upsert_product(
        &self,
        draft: &ProductDraft,
        observed_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.inner.lock().await;
        match state.products.get_mut(&draft.sku) {
            Some(existing) => {
                let first_seen_at = existing.first_seen_at;
                *existing = draft.clone().into_product(first_seen_at, observed_at);
                Ok(UpsertOutcome {
                    product: existing.clone(),
                    inserted: false,
                })
            }
            None => {
                let product = draft.clone().into_product(observed_at, observed_at);
                state
                    .products
                    .insert(product.sku.clone(), product.clone());
                Ok(UpsertOutcome {
                    product,
                    inserted: true,
                })
            }
        }
    }

    async fn count_absent_skus(&self, present_skus: &[String]) -> Result<i64, StoreError> {
        let present: HashSet<&str> = present_skus.iter().map(String::as_str).collect();
        let state = self.inner.lock().await;
        let absent = state
            .products
            .keys()
            .filter(|sku| !present.contains(sku.as_str()))
            .count();
        Ok(absent as i64)
    }

    async fn subscriptions_with_owners(&self) -> Result<Vec<OwnedSubscription>, StoreError> {
        Ok(self.inner.lock().await.subscriptions.clone())
    }

    async fn insert_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        self.inner.lock().await.runs.push(run.clone());
        Ok(())
    }

    async fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>, StoreError> {
        let state = self.inner.lock().await;
        let mut runs = state.runs.clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mk_draft(sku: &str, name: &str) -> ProductDraft {
        ProductDraft {
            sku: sku.to_string(),
            name: name.to_string(),
            brand: "Acme".to_string(),
            outlet_price: Some(49.0),
            original_price: Some(99.0),
            href: format!("/product/{sku}"),
            image_url: String::new(),
            b_grade: false,
            bullet_points: vec!["refurbished".to_string()],
            category: "appliances".to_string(),
            store_stock: None,
            buyable_online: true,
        }
    }

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, hour, 0, 0).single().unwrap()
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates_in_place() {
        let store = MemoryCatalogStore::new();

        let first = store.upsert_product(&mk_draft("A1", "Kettle"), ts(8)).await.unwrap();
        assert!(first.inserted);
        assert_eq!(first.product.first_seen_at, ts(8));

        let second = store.upsert_product(&mk_draft("A1", "Kettle v2"), ts(9)).await.unwrap();
        assert!(!second.inserted);
        assert_eq!(second.product.name, "Kettle v2");
        assert_eq!(second.product.first_seen_at, ts(8));
        assert_eq!(second.product.last_updated_at, ts(9));

        assert_eq!(store.products().await.len(), 1);
    }

    #[tokio::test]
    async fn absent_skus_are_counted_without_deletion() {
        let store = MemoryCatalogStore::new();
        for sku in ["A", "B", "C"] {
            store.upsert_product(&mk_draft(sku, sku), ts(8)).await.unwrap();
        }

        let absent = store
            .count_absent_skus(&["A".to_string(), "B".to_string()])
            .await
            .unwrap();
        assert_eq!(absent, 1);
        assert_eq!(store.products().await.len(), 3);
    }

    #[tokio::test]
    async fn absent_count_against_empty_cycle_is_everything() {
        let store = MemoryCatalogStore::new();
        store.upsert_product(&mk_draft("A", "A"), ts(8)).await.unwrap();
        assert_eq!(store.count_absent_skus(&[]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn recent_runs_returns_newest_first() {
        let store = MemoryCatalogStore::new();
        for hour in [8, 10, 9] {
            store
                .insert_run(&RunRecord {
                    id: Uuid::new_v4(),
                    started_at: ts(hour),
                    finished_at: ts(hour),
                    status: RunStatus::Succeeded,
                    total_products: 0,
                    new_products: 0,
                    removed_products: 0,
                    error: None,
                })
                .await
                .unwrap();
        }

        let runs = store.recent_runs(2).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].started_at, ts(10));
        assert_eq!(runs[1].started_at, ts(9));
    }
}
