//! Price records and the batched writer feeding the time-series store.
//!
//! Prices are written in chunks of [`BATCH_WRITE_LIMIT`], the largest batch
//! the store accepts atomically. Within one chunk a timestamp is written
//! once: the first price seen for it wins.

use crate::coingecko::PricePair;
use crate::errors::{ImporterError, Result};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Maximum number of items written in one batch.
pub const BATCH_WRITE_LIMIT: usize = 25;

/// One stored price point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Partition key: `asset#<coinId>` or `<platform>:<address>`
    #[serde(rename = "PK")]
    pub pk: String,
    /// Sort key: unix timestamp in seconds
    #[serde(rename = "SK")]
    pub sk: i64,
    /// USD price
    pub price: f64,
}

impl PriceRecord {
    /// Build a record from a `[unix_ms, price]` pair.
    pub fn from_pair(pk: &str, (timestamp_ms, price): PricePair) -> Self {
        Self {
            pk: pk.to_string(),
            sk: to_unix_seconds(timestamp_ms),
            price,
        }
    }
}

/// Millisecond timestamp to the nearest whole second, halves rounding up.
pub fn to_unix_seconds(timestamp_ms: i64) -> i64 {
    (timestamp_ms + 500).div_euclid(1000)
}

/// Destination of price records.
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Atomically write up to [`BATCH_WRITE_LIMIT`] records.
    async fn batch_write(&self, records: &[PriceRecord]) -> Result<()>;
}

/// Split prices into write batches for `pk`.
///
/// Batches follow input order. Records repeating a timestamp already present
/// earlier in the same batch are dropped.
pub fn build_batches(pk: &str, prices: &[PricePair]) -> Vec<Vec<PriceRecord>> {
    prices
        .chunks(BATCH_WRITE_LIMIT)
        .map(|chunk| {
            let mut seen = HashSet::with_capacity(chunk.len());
            chunk
                .iter()
                .map(|pair| PriceRecord::from_pair(pk, *pair))
                .filter(|record| seen.insert(record.sk))
                .collect()
        })
        .collect()
}

/// Write every price for `pk`, one concurrent batch write per chunk.
///
/// Completes once all batches are written and fails if any batch fails.
/// Returns the number of records written.
pub async fn store_prices<S>(store: &S, pk: &str, prices: &[PricePair]) -> Result<usize>
where
    S: PriceStore + ?Sized,
{
    info!("Storing prices for {}", pk);

    let batches = build_batches(pk, prices);
    let written = batches.iter().map(Vec::len).sum();

    try_join_all(batches.iter().map(|batch| store.batch_write(batch))).await?;

    debug!("Wrote {} records in {} batches for {}", written, batches.len(), pk);
    Ok(written)
}

/// In-memory store used for dry runs.
#[derive(Debug, Default)]
pub struct MemoryPriceStore {
    /// Records keyed by (PK, SK)
    records: Mutex<HashMap<(String, i64), f64>>,
    /// Total batch writes received
    batch_writes: AtomicU64,
}

impl MemoryPriceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct (PK, SK) records held.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Price stored for a key, if any.
    pub fn get(&self, pk: &str, sk: i64) -> Option<f64> {
        self.records.lock().get(&(pk.to_string(), sk)).copied()
    }

    /// Distinct partition keys held, sorted.
    pub fn partition_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .records
            .lock()
            .keys()
            .map(|(pk, _)| pk.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        keys.sort();
        keys
    }

    /// Get the total number of batch writes received.
    pub fn batch_writes(&self) -> u64 {
        self.batch_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceStore for MemoryPriceStore {
    async fn batch_write(&self, records: &[PriceRecord]) -> Result<()> {
        if records.len() > BATCH_WRITE_LIMIT {
            return Err(ImporterError::store(format!(
                "batch of {} exceeds limit of {}",
                records.len(),
                BATCH_WRITE_LIMIT
            )));
        }

        let mut stored = self.records.lock();
        for record in records {
            stored.insert((record.pk.clone(), record.sk), record.price);
        }
        self.batch_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
