//! Stub source and store shared by the unit tests.

use crate::coingecko::{CoinDetail, CoinListEntry, PricePair, PriceRange, PriceSource};
use crate::errors::{ImporterError, Result};
use crate::store::{PriceRecord, PriceStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Store that remembers every batch it receives.
#[derive(Default)]
pub struct RecordingStore {
    calls: Mutex<Vec<Vec<PriceRecord>>>,
    /// 1-based call number that fails, if any
    fail_on_call: Option<usize>,
    /// Partition key whose writes always fail
    failing_pk: Option<String>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on_call(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::default()
        }
    }

    pub fn failing_for_pk(pk: &str) -> Self {
        Self {
            failing_pk: Some(pk.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<PriceRecord>> {
        self.calls.lock().clone()
    }

    /// Number of batch writes per partition key.
    pub fn writes_per_pk(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for batch in self.calls.lock().iter() {
            if let Some(first) = batch.first() {
                *counts.entry(first.pk.clone()).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[async_trait]
impl PriceStore for RecordingStore {
    async fn batch_write(&self, records: &[PriceRecord]) -> Result<()> {
        let mut calls = self.calls.lock();
        calls.push(records.to_vec());

        if self.fail_on_call == Some(calls.len()) {
            return Err(ImporterError::store("provisioned throughput exceeded"));
        }
        if let Some(pk) = &self.failing_pk {
            if records.iter().any(|r| &r.pk == pk) {
                return Err(ImporterError::store(format!("write rejected for {}", pk)));
            }
        }
        Ok(())
    }
}

/// Upstream stub with scripted failures.
#[derive(Default)]
pub struct StubSource {
    coins: Vec<CoinListEntry>,
    details: HashMap<String, serde_json::Value>,
    prices: HashMap<String, Vec<PricePair>>,
    /// Remaining price-range failures per coin; `usize::MAX` never recovers
    failures: Mutex<HashMap<String, usize>>,
    fail_coin_list: bool,
    /// Every request in dispatch order, e.g. `detail:bitcoin`
    requests: Mutex<Vec<String>>,
}

impl StubSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coin(
        mut self,
        id: &str,
        platforms: serde_json::Value,
        prices: Vec<PricePair>,
    ) -> Self {
        self.coins.push(CoinListEntry {
            id: id.to_string(),
            symbol: id.chars().take(3).collect(),
            name: id.to_string(),
        });
        self.details.insert(id.to_string(), platforms);
        self.prices.insert(id.to_string(), prices);
        self
    }

    pub fn failing(self, id: &str, times: usize) -> Self {
        self.failures.lock().insert(id.to_string(), times);
        self
    }

    pub fn failing_coin_list(mut self) -> Self {
        self.fail_coin_list = true;
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// How many times a coin's price range was requested.
    pub fn price_requests_for(&self, id: &str) -> usize {
        let wanted = format!("prices:{}", id);
        self.requests.lock().iter().filter(|r| **r == wanted).count()
    }
}

#[async_trait]
impl PriceSource for StubSource {
    async fn coins_list(&self) -> Result<Vec<CoinListEntry>> {
        self.requests.lock().push("list".to_string());
        if self.fail_coin_list {
            return Err(ImporterError::Upstream {
                status: 429,
                url: "/coins/list".to_string(),
            });
        }
        Ok(self.coins.clone())
    }

    async fn coin_detail(&self, coin_id: &str) -> Result<CoinDetail> {
        self.requests.lock().push(format!("detail:{}", coin_id));
        Ok(CoinDetail {
            id: coin_id.to_string(),
            platforms: self.details.get(coin_id).cloned().unwrap_or_default(),
        })
    }

    async fn price_range(&self, coin_id: &str, _from: i64, _to: i64) -> Result<PriceRange> {
        self.requests.lock().push(format!("prices:{}", coin_id));

        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(coin_id) {
            if *remaining > 0 {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                return Err(ImporterError::Upstream {
                    status: 500,
                    url: format!("/coins/{}/market_chart/range", coin_id),
                });
            }
        }

        Ok(PriceRange {
            prices: self.prices.get(coin_id).cloned().unwrap_or_default(),
        })
    }
}
