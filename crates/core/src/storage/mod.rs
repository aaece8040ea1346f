pub mod audit;
pub mod holdings;
pub mod lock;
pub mod market;
pub mod recommendations;

use crate::domain::market::{FundamentalRecord, Holding};
use crate::domain::recommendation::Recommendation;
use crate::pipeline::{AuditEvent, AuditSink, HoldingsSource, RecommendationStore};
use anyhow::Context;
use uuid::Uuid;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Postgres-backed implementation of every pipeline collaborator. One pool,
/// cloned cheaply; constructed at the binary edge and passed in.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl crate::market::MarketDataSource for PgStore {
    async fn latest_fundamental(&self, ticker: &str) -> anyhow::Result<Option<FundamentalRecord>> {
        market::latest_fundamental(&self.pool, ticker).await
    }

    async fn latest_price(&self, ticker: &str) -> anyhow::Result<Option<f64>> {
        market::latest_price(&self.pool, ticker).await
    }
}

#[async_trait::async_trait]
impl HoldingsSource for PgStore {
    async fn fetch_holdings(&self, owner: &str) -> anyhow::Result<Vec<Holding>> {
        holdings::fetch_holdings(&self.pool, owner).await
    }
}

#[async_trait::async_trait]
impl RecommendationStore for PgStore {
    async fn persist(&self, rec: &Recommendation) -> anyhow::Result<Uuid> {
        recommendations::persist(&self.pool, rec).await
    }
}

#[async_trait::async_trait]
impl AuditSink for PgStore {
    async fn emit(&self, event: &AuditEvent) -> anyhow::Result<()> {
        audit::insert_event(&self.pool, event).await.map(|_| ())
    }
}
