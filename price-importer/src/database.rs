//! PostgreSQL-backed price store.
//!
//! Handles:
//! - Connection pooling
//! - Table creation
//! - Atomic batch upserts keyed by (pk, sk)

use crate::config::DatabaseConfig;
use crate::errors::{ImporterError, Result};
use crate::store::{PriceRecord, PriceStore, BATCH_WRITE_LIMIT};
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use rust_decimal::prelude::*;
use std::time::Duration;
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// Table holding every imported price point.
const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS historical_prices (
        pk    TEXT    NOT NULL,
        sk    BIGINT  NOT NULL,
        price NUMERIC NOT NULL,
        PRIMARY KEY (pk, sk)
    )
"#;

/// Prepared statement for upserting one price point.
const UPSERT_PRICE_SQL: &str = r#"
    INSERT INTO historical_prices (pk, sk, price)
    VALUES ($1, $2, $3)
    ON CONFLICT (pk, sk) DO UPDATE SET
        price = EXCLUDED.price
    WHERE
        historical_prices.price IS DISTINCT FROM EXCLUDED.price
"#;

/// Price store writing into PostgreSQL/TimescaleDB.
pub struct PostgresPriceStore {
    /// Connection pool
    pool: Pool,
}

impl PostgresPriceStore {
    /// Create a new store with a connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pg_config = config.to_pool_config();

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(
            pg_config
                .get_pg_config()
                .map_err(|e| ImporterError::config(format!("Invalid PG config: {}", e)))?,
            NoTls,
            mgr_config,
        );

        let pool = Pool::builder(mgr)
            .max_size(config.pool_max)
            .wait_timeout(Some(Duration::from_secs(10)))
            .create_timeout(Some(Duration::from_secs(10)))
            .recycle_timeout(Some(Duration::from_secs(10)))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| ImporterError::config(format!("Failed to create pool: {}", e)))?;

        // Test connection
        let client = pool.get().await?;
        let _ = client.simple_query("SELECT 1").await?;
        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Create the price table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(CREATE_TABLE_SQL).await?;
        Ok(())
    }
}

#[async_trait]
impl PriceStore for PostgresPriceStore {
    async fn batch_write(&self, records: &[PriceRecord]) -> Result<()> {
        if records.len() > BATCH_WRITE_LIMIT {
            return Err(ImporterError::store(format!(
                "batch of {} exceeds limit of {}",
                records.len(),
                BATCH_WRITE_LIMIT
            )));
        }
        if records.is_empty() {
            return Ok(());
        }

        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;
        let statement = transaction.prepare_cached(UPSERT_PRICE_SQL).await?;

        for record in records {
            let price = Decimal::from_f64(record.price).ok_or_else(|| {
                ImporterError::store(format!(
                    "price {} for {} at {} is not representable",
                    record.price, record.pk, record.sk
                ))
            })?;
            transaction
                .execute(&statement, &[&record.pk, &record.sk, &price])
                .await?;
        }

        transaction.commit().await?;
        debug!("Upserted {} records for {}", records.len(), records[0].pk);

        Ok(())
    }
}
