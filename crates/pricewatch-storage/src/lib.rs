//! Product persistence: the store contract, Postgres and in-memory
//! implementations, and the reconciliation step that lands scraped items.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use pricewatch_core::{ProductRecord, ScrapedItem};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::debug;

pub const CRATE_NAME: &str = "pricewatch-storage";

/// Upsert sink for scraped products.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Insert or refresh one product row keyed by `(source, url)`.
    ///
    /// `created_at` sticks from the first insert; every later upsert of the
    /// same key rewrites the remaining columns and `updated_at`.
    async fn upsert(&self, record: &ProductRecord) -> Result<()>;
}

pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, run pending migrations and return a ready store.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("running product migrations")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn upsert(&self, record: &ProductRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (source, url, title, price, image, query, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (source, url) DO UPDATE SET
                title = EXCLUDED.title,
                price = EXCLUDED.price,
                image = EXCLUDED.image,
                query = EXCLUDED.query,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.source)
        .bind(&record.url)
        .bind(&record.title)
        .bind(record.price)
        .bind(&record.image)
        .bind(&record.query)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting product {}:{}", record.source, record.url))?;
        Ok(())
    }
}

/// Process-local store backing tests and datastore-free local runs.
#[derive(Default)]
pub struct MemoryProductStore {
    records: Mutex<HashMap<(String, String), ProductRecord>>,
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, source: &str, url: &str) -> Option<ProductRecord> {
        self.records
            .lock()
            .await
            .get(&(source.to_string(), url.to_string()))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl ProductStore for MemoryProductStore {
    async fn upsert(&self, record: &ProductRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        let key = (record.source.clone(), record.url.clone());
        match records.get_mut(&key) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = record.clone();
                existing.created_at = created_at;
            }
            None => {
                records.insert(key, record.clone());
            }
        }
        Ok(())
    }
}

/// Persist one batch of scraped items under the query that produced them.
///
/// Every item in the batch shares a single timestamp. Upserts run one by
/// one; the first failure aborts the remainder of the batch and rows
/// already written stay written. Returns the number of upserts performed.
pub async fn reconcile(
    store: &dyn ProductStore,
    query: &str,
    items: &[ScrapedItem],
) -> Result<usize> {
    let now = Utc::now();
    for item in items {
        let record = ProductRecord::from_item(item, query, now);
        store.upsert(&record).await?;
    }
    debug!(query, count = items.len(), "reconciled scraped items");
    Ok(items.len())
}
