//! Product catalog backed by SQLite
//!
//! The catalog is shared by every conversation and changes rarely, so reads go
//! through an in-process snapshot that is refreshed on a timer. Lookups that
//! fail are retried; if the store stays unavailable the last good snapshot is
//! served instead of failing the turn.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::CatalogSettings;
use crate::conversation::ProductRef;

/// A sellable product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    #[serde(default)]
    pub sale_price: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_stock")]
    pub stock_count: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_stock() -> i64 {
    1
}

fn default_active() -> bool {
    true
}

impl CatalogProduct {
    /// Price the customer pays: the sale price when one is running
    pub fn effective_price(&self) -> f64 {
        self.sale_price.unwrap_or(self.price)
    }

    pub fn to_ref(&self) -> ProductRef {
        ProductRef {
            product_id: self.id.clone(),
            display_name: self.name.clone(),
            category: self.category.clone(),
        }
    }
}

/// Seed file layout: a list of `[[products]]` tables
#[derive(Debug, Deserialize)]
struct CatalogSeed {
    #[serde(default)]
    products: Vec<CatalogProduct>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Seed parse error: {0}")]
    Seed(#[from] toml::de::Error),

    #[error("Invalid product {id}: {reason}")]
    InvalidProduct { id: String, reason: String },
}

struct CachedSnapshot {
    products: Arc<Vec<CatalogProduct>>,
    loaded_at: Instant,
}

pub struct ProductCatalog {
    pool: SqlitePool,
    settings: CatalogSettings,
    cache: RwLock<Option<CachedSnapshot>>,
}

impl ProductCatalog {
    /// Wrap a pool and make sure the products table exists
    pub async fn from_pool(pool: SqlitePool, settings: CatalogSettings) -> Result<Self, CatalogError> {
        let catalog = Self {
            pool,
            settings,
            cache: RwLock::new(None),
        };
        catalog.init_schema().await?;
        Ok(catalog)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                price REAL NOT NULL,
                sale_price REAL,
                tags TEXT NOT NULL DEFAULT '[]',
                stock_count INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load `[[products]]` from a TOML seed file and upsert them
    pub async fn seed_from_file(&self, path: &Path) -> Result<usize, CatalogError> {
        let content = tokio::fs::read_to_string(path).await?;
        self.seed_from_str(&content).await
    }

    pub async fn seed_from_str(&self, content: &str) -> Result<usize, CatalogError> {
        let seed: CatalogSeed = toml::from_str(content)?;
        for product in &seed.products {
            self.upsert(product).await?;
        }
        tracing::info!("Seeded {} catalog product(s)", seed.products.len());
        Ok(seed.products.len())
    }

    /// Insert or replace a product. Ids must be UUID-shaped.
    pub async fn upsert(&self, product: &CatalogProduct) -> Result<(), CatalogError> {
        if uuid::Uuid::parse_str(&product.id).is_err() {
            return Err(CatalogError::InvalidProduct {
                id: product.id.clone(),
                reason: "id is not a UUID".into(),
            });
        }
        if product.name.trim().is_empty() {
            return Err(CatalogError::InvalidProduct {
                id: product.id.clone(),
                reason: "name is empty".into(),
            });
        }

        let tags = serde_json::to_string(&product.tags).unwrap_or_else(|_| "[]".into());

        sqlx::query(
            r#"
            INSERT INTO products (id, position, name, category, description, price, sale_price, tags, stock_count, is_active)
            VALUES (?, (SELECT COALESCE(MAX(position), 0) + 1 FROM products), ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                category = excluded.category,
                description = excluded.description,
                price = excluded.price,
                sale_price = excluded.sale_price,
                tags = excluded.tags,
                stock_count = excluded.stock_count,
                is_active = excluded.is_active
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(&product.category)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.sale_price)
        .bind(tags)
        .bind(product.stock_count)
        .bind(product.is_active)
        .execute(&self.pool)
        .await?;

        self.invalidate();
        Ok(())
    }

    /// Active, in-stock products in catalog insertion order
    pub async fn load_active(&self) -> Result<Vec<CatalogProduct>, sqlx::Error> {
        let rows: Vec<(String, String, String, String, f64, Option<f64>, String, i64, bool)> = sqlx::query_as(
            r#"
            SELECT id, name, category, description, price, sale_price, tags, stock_count, is_active
            FROM products
            WHERE is_active = 1 AND stock_count > 0
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, name, category, description, price, sale_price, tags, stock_count, is_active)| CatalogProduct {
                    id,
                    name,
                    category,
                    description,
                    price,
                    sale_price,
                    tags: serde_json::from_str(&tags).unwrap_or_default(),
                    stock_count,
                    is_active,
                },
            )
            .collect())
    }

    /// Current catalog snapshot.
    ///
    /// Never fails: after `lookup_retries` failed attempts the stale snapshot
    /// (or an empty catalog) is returned.
    pub async fn products(&self) -> Arc<Vec<CatalogProduct>> {
        let refresh = Duration::from_secs(self.settings.refresh_secs);
        let fresh = self
            .cache
            .read()
            .as_ref()
            .filter(|cached| cached.loaded_at.elapsed() < refresh)
            .map(|cached| cached.products.clone());
        if let Some(products) = fresh {
            return products;
        }

        let attempts = self.settings.lookup_retries.max(1);
        for attempt in 1..=attempts {
            match self.load_active().await {
                Ok(products) => {
                    let products = Arc::new(products);
                    *self.cache.write() = Some(CachedSnapshot {
                        products: products.clone(),
                        loaded_at: Instant::now(),
                    });
                    return products;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Catalog lookup failed");
                    if attempt < attempts {
                        let backoff = self.settings.retry_backoff_ms * u64::from(attempt);
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }

        let stale = self.cache.read().as_ref().map(|cached| cached.products.clone());
        match stale {
            Some(products) => {
                tracing::warn!("Serving stale catalog snapshot");
                products
            }
            None => {
                tracing::error!("Catalog unavailable, continuing without products");
                Arc::new(Vec::new())
            }
        }
    }

    fn invalidate(&self) {
        *self.cache.write() = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::memory::open_in_memory_pool;

    pub(crate) const SAMPLE_CATALOG: &str = r#"
[[products]]
id = "6f1c2a1e-5b7d-4c1a-9a51-2d7a4f0e1a01"
name = "Wild Stone Perfume"
category = "perfume"
description = "Long-lasting woody fragrance for men"
price = 450.0
tags = ["fragrance", "woody", "long-lasting"]
stock_count = 40

[[products]]
id = "6f1c2a1e-5b7d-4c1a-9a51-2d7a4f0e1a02"
name = "Himalaya Neem Face Wash"
category = "face wash"
description = "Purifying neem face wash for oily skin"
price = 180.0
sale_price = 165.0
tags = ["neem", "oil control", "cleanser"]
stock_count = 25

[[products]]
id = "6f1c2a1e-5b7d-4c1a-9a51-2d7a4f0e1a03"
name = "Pantene Silky Smooth Shampoo"
category = "shampoo"
description = "Smoothing shampoo with argan essence"
price = 280.0
sale_price = 265.0
tags = ["frizz control", "argan", "smooth hair"]
stock_count = 30

[[products]]
id = "6f1c2a1e-5b7d-4c1a-9a51-2d7a4f0e1a04"
name = "Sunsilk Hair Fall Shampoo"
category = "shampoo"
description = "Keratin shampoo against hair fall"
price = 225.0
tags = ["hair fall", "keratin"]
stock_count = 12

[[products]]
id = "6f1c2a1e-5b7d-4c1a-9a51-2d7a4f0e1a05"
name = "Dove Beauty Bar"
category = "soap"
description = "Moisturizing beauty bar"
price = 65.0
tags = ["moisturizing", "gentle"]
stock_count = 0
"#;

    pub(crate) async fn sample_catalog() -> ProductCatalog {
        let pool = open_in_memory_pool().await.unwrap();
        let catalog = ProductCatalog::from_pool(pool, CatalogSettings::default())
            .await
            .unwrap();
        catalog.seed_from_str(SAMPLE_CATALOG).await.unwrap();
        catalog
    }

    #[tokio::test]
    async fn test_seed_and_load_in_order() {
        let catalog = sample_catalog().await;
        let products = catalog.products().await;

        // Out-of-stock soap is not matchable
        assert_eq!(products.len(), 4);
        assert_eq!(products[0].name, "Wild Stone Perfume");
        assert_eq!(products[3].name, "Sunsilk Hair Fall Shampoo");
        assert_eq!(products[1].tags, vec!["neem", "oil control", "cleanser"]);
        assert_eq!(products[1].effective_price(), 165.0);
    }

    #[tokio::test]
    async fn test_upsert_keeps_position_and_rejects_bad_ids() {
        let catalog = sample_catalog().await;

        let mut perfume = catalog.products().await[0].clone();
        perfume.price = 499.0;
        catalog.upsert(&perfume).await.unwrap();

        let products = catalog.products().await;
        assert_eq!(products[0].id, perfume.id);
        assert_eq!(products[0].price, 499.0);

        perfume.id = "not-a-uuid".into();
        let err = catalog.upsert(&perfume).await.unwrap_err();
        assert!(matches!(err, CatalogError::InvalidProduct { .. }));
    }

    #[tokio::test]
    async fn test_serves_stale_snapshot_when_store_fails() {
        let pool = open_in_memory_pool().await.unwrap();
        let settings = CatalogSettings {
            refresh_secs: 0,
            lookup_retries: 2,
            retry_backoff_ms: 1,
            ..CatalogSettings::default()
        };
        let catalog = ProductCatalog::from_pool(pool.clone(), settings).await.unwrap();
        catalog.seed_from_str(SAMPLE_CATALOG).await.unwrap();
        assert_eq!(catalog.products().await.len(), 4);

        pool.close().await;
        assert_eq!(catalog.products().await.len(), 4);
    }
}
