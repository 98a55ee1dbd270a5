//! CoinGecko REST client for coin metadata and historical prices.
//!
//! Every request first acquires the shared [`RequestGate`], then issues a GET
//! and parses the JSON body. Nothing is retried here; the import driver owns
//! retries.

use crate::config::Config;
use crate::errors::{ImporterError, Result};
use crate::rate_limit::RequestGate;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Header carrying a CoinGecko API key.
const API_KEY_HEADER: &str = "x-cg-pro-api-key";

/// Query flags that strip the coin detail payload down to metadata.
const COIN_DETAIL_FLAGS: &str = "localization=false&tickers=false&market_data=false&community_data=false&developer_data=false&sparkline=false";

/// One entry of `/coins/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinListEntry {
    pub id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
}

/// Coin detail payload, reduced to what the importer reads.
///
/// `platforms` is kept as raw JSON so a malformed value never fails the
/// whole response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoinDetail {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub platforms: serde_json::Value,
}

/// A `[unix_ms, price]` pair as returned by the market chart endpoint.
pub type PricePair = (i64, f64);

/// `/coins/{id}/market_chart/range` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PriceRange {
    #[serde(default)]
    pub prices: Vec<PricePair>,
}

/// Upstream source of coins and prices.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Every coin the upstream knows about.
    async fn coins_list(&self) -> Result<Vec<CoinListEntry>>;

    /// Metadata for one coin, including its platform deployments.
    async fn coin_detail(&self, coin_id: &str) -> Result<CoinDetail>;

    /// USD prices for one coin between two unix timestamps (seconds).
    async fn price_range(&self, coin_id: &str, from: i64, to: i64) -> Result<PriceRange>;
}

/// Rate-limited CoinGecko client.
pub struct CoinGeckoClient {
    /// API root, e.g. `https://api.coingecko.com/api/v3`
    base_url: String,
    /// Optional API key
    api_key: Option<String>,
    /// Shared request gate
    gate: Arc<RequestGate>,
    /// HTTP client
    http: reqwest::Client,
    /// Total requests dispatched
    requests_sent: AtomicU64,
}

impl CoinGeckoClient {
    /// Create a new client.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        gate: Arc<RequestGate>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("price-importer/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            gate,
            http,
            requests_sent: AtomicU64::new(0),
        })
    }

    /// Create a client from the importer configuration.
    pub fn from_config(config: &Config, gate: Arc<RequestGate>) -> Result<Self> {
        Self::new(
            config.coingecko_api_url.clone(),
            config.coingecko_api_key.clone(),
            gate,
            config.http_timeout,
        )
    }

    /// Get the total number of requests dispatched.
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::SeqCst)
    }

    fn coins_list_url(&self) -> String {
        format!("{}/coins/list", self.base_url)
    }

    fn coin_detail_url(&self, coin_id: &str) -> String {
        format!("{}/coins/{}?{}", self.base_url, coin_id, COIN_DETAIL_FLAGS)
    }

    fn price_range_url(&self, coin_id: &str, from: i64, to: i64) -> String {
        format!(
            "{}/coins/{}/market_chart/range?vs_currency=usd&from={}&to={}",
            self.base_url, coin_id, from, to
        )
    }

    /// Acquire the gate, GET `url` and parse the body as JSON.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.gate.acquire().await;
        self.requests_sent.fetch_add(1, Ordering::SeqCst);
        debug!("GET {}", url);

        let mut request = self.http.get(url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImporterError::Upstream {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl PriceSource for CoinGeckoClient {
    async fn coins_list(&self) -> Result<Vec<CoinListEntry>> {
        self.get_json(&self.coins_list_url()).await
    }

    async fn coin_detail(&self, coin_id: &str) -> Result<CoinDetail> {
        self.get_json(&self.coin_detail_url(coin_id)).await
    }

    async fn price_range(&self, coin_id: &str, from: i64, to: i64) -> Result<PriceRange> {
        self.get_json(&self.price_range_url(coin_id, from, to)).await
    }
}
