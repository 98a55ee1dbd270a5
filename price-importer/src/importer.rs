//! Import driver: walks the coin list and stores each coin's price history.
//!
//! Per coin the driver fetches metadata and prices, writes the prices under
//! every platform key and then under the canonical asset key. A coin that
//! fails is retried in place up to `max_attempts_per_coin` times, then
//! skipped.

use crate::coingecko::{CoinListEntry, PriceSource};
use crate::config::Config;
use crate::errors::{ImporterError, Result};
use crate::platforms::{asset_key, for_each_platform_key};
use crate::store::{store_prices, PriceStore};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const DAY_SECS: i64 = 24 * 3600;

/// Longest window for which CoinGecko still returns hourly prices.
pub const MAX_WINDOW_DAYS: i64 = 90;

/// Time range of prices to import, in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportWindow {
    pub from: i64,
    pub to: i64,
}

impl ImportWindow {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    /// The `days` days ending at `now`.
    pub fn trailing(days: i64, now: DateTime<Utc>) -> Result<Self> {
        if days < 0 {
            return Err(ImporterError::config(format!(
                "History of {} days must not be negative",
                days
            )));
        }
        let to = now.timestamp();
        let from = days
            .checked_mul(DAY_SECS)
            .and_then(|span| to.checked_sub(span))
            .ok_or_else(|| ImporterError::config(format!("History of {} days is out of range", days)))?;
        Ok(Self::new(from, to))
    }

    /// Length of the window in whole days, rounded up.
    pub fn days(&self) -> i64 {
        let span = self.to - self.from;
        span.div_euclid(DAY_SECS) + i64::from(span.rem_euclid(DAY_SECS) != 0)
    }

    /// Reject windows that are inverted or too long for hourly resolution.
    pub fn validate(&self) -> Result<()> {
        if self.from > self.to {
            return Err(ImporterError::config(format!(
                "Import window starts at {} after it ends at {}",
                self.from, self.to
            )));
        }
        if self.to - self.from > MAX_WINDOW_DAYS * DAY_SECS {
            return Err(ImporterError::WindowTooLarge { days: self.days() });
        }
        Ok(())
    }
}

/// Where a coin is in its processing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinState {
    Fetching,
    Writing,
    Advancing,
    Failed,
}

impl fmt::Display for CoinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinState::Fetching => write!(f, "fetching"),
            CoinState::Writing => write!(f, "writing"),
            CoinState::Advancing => write!(f, "advancing"),
            CoinState::Failed => write!(f, "failed"),
        }
    }
}

/// Run parameters.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub window: ImportWindow,
    pub starting_coin_index: usize,
    pub max_attempts_per_coin: u32,
}

impl ImportOptions {
    /// Build run parameters from configuration, with the window ending at `now`.
    pub fn from_config(config: &Config, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            window: ImportWindow::trailing(config.history_days, now)?,
            starting_coin_index: config.starting_coin_index,
            max_attempts_per_coin: config.max_attempts_per_coin.max(1),
        })
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Coins in the upstream list
    pub coins_total: usize,
    /// Coins whose prices were fully written
    pub coins_imported: usize,
    /// Coins given up on after exhausting their attempts
    pub coins_skipped: Vec<String>,
    /// Coin processing attempts, retries included
    pub attempts: usize,
    /// Price records written across all keys
    pub records_written: usize,
}

/// Sequential importer over a price source and a store.
pub struct Importer {
    source: Arc<dyn PriceSource>,
    store: Arc<dyn PriceStore>,
    options: ImportOptions,
}

impl Importer {
    pub fn new(
        source: Arc<dyn PriceSource>,
        store: Arc<dyn PriceStore>,
        options: ImportOptions,
    ) -> Self {
        Self {
            source,
            store,
            options,
        }
    }

    /// Run the import over the whole coin list.
    pub async fn run(&self) -> Result<ImportSummary> {
        // Must fail before any request goes out
        self.options.window.validate()?;

        info!(
            "Importing {} days of prices ({} to {}) starting at coin index {}",
            self.options.window.days(),
            self.options.window.from,
            self.options.window.to,
            self.options.starting_coin_index
        );

        let coins = self.source.coins_list().await?;
        info!("Fetched {} coins", coins.len());

        let mut summary = ImportSummary {
            coins_total: coins.len(),
            ..ImportSummary::default()
        };

        let mut index = self.options.starting_coin_index;
        let mut attempts = 0u32;

        while let Some(coin) = coins.get(index) {
            attempts += 1;
            summary.attempts += 1;
            info!("Getting data for {} at index {}...", coin.id, index);

            match self.import_coin(coin).await {
                Ok(written) => {
                    debug!(coin = %coin.id, state = %CoinState::Advancing, "{} records", written);
                    summary.coins_imported += 1;
                    summary.records_written += written;
                    index += 1;
                    attempts = 0;
                }
                Err(e) if attempts < self.options.max_attempts_per_coin => {
                    debug!(coin = %coin.id, state = %CoinState::Failed);
                    warn!(
                        "Error at token {} ({}), attempt {}/{}: {}. Retrying...",
                        index, coin.id, attempts, self.options.max_attempts_per_coin, e
                    );
                }
                Err(e) => {
                    error!(
                        "Giving up on token {} ({}) after {} attempts: {}",
                        index, coin.id, attempts, e
                    );
                    summary.coins_skipped.push(coin.id.clone());
                    index += 1;
                    attempts = 0;
                }
            }
        }

        info!(
            "Import finished: {}/{} coins imported, {} skipped, {} records written",
            summary.coins_imported,
            summary.coins_total,
            summary.coins_skipped.len(),
            summary.records_written
        );

        Ok(summary)
    }

    /// Fetch and store one coin. Returns the number of records written.
    async fn import_coin(&self, coin: &CoinListEntry) -> Result<usize> {
        debug!(coin = %coin.id, state = %CoinState::Fetching);
        let window = self.options.window;

        let (detail, range) = tokio::try_join!(
            self.source.coin_detail(&coin.id),
            self.source.price_range(&coin.id, window.from, window.to),
        )?;

        debug!(coin = %coin.id, state = %CoinState::Writing, "{} prices", range.prices.len());

        let written = AtomicUsize::new(0);
        let store = self.store.as_ref();
        let prices = range.prices.as_slice();

        for_each_platform_key(&detail, |pk| {
            let written = &written;
            async move {
                let count = store_prices(store, &pk, prices).await?;
                written.fetch_add(count, Ordering::SeqCst);
                Ok(())
            }
        })
        .await?;

        let count = store_prices(store, &asset_key(&coin.id), prices).await?;
        Ok(written.into_inner() + count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coingecko::PricePair;
    use crate::store::MemoryPriceStore;
    use crate::testing::{RecordingStore, StubSource};
    use chrono::TimeZone;
    use serde_json::json;

    fn options() -> ImportOptions {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        ImportOptions {
            window: ImportWindow::trailing(80, now).unwrap(),
            starting_coin_index: 0,
            max_attempts_per_coin: 5,
        }
    }

    fn prices(count: usize) -> Vec<PricePair> {
        (0..count)
            .map(|i| (1_700_000_000_000 + i as i64 * 3_600_000, 1.0 + i as f64))
            .collect()
    }

    #[test]
    fn test_window_days() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let window = ImportWindow::trailing(80, now).unwrap();

        assert_eq!(window.to, now.timestamp());
        assert_eq!(window.to - window.from, 80 * DAY_SECS);
        assert_eq!(window.days(), 80);
        assert_eq!(ImportWindow::new(0, DAY_SECS + 1).days(), 2);
    }

    #[test]
    fn test_window_validation() {
        assert!(ImportWindow::new(0, 90 * DAY_SECS).validate().is_ok());

        let err = ImportWindow::new(0, 90 * DAY_SECS + 1).validate().unwrap_err();
        assert!(matches!(err, ImporterError::WindowTooLarge { days: 91 }));

        let err = ImportWindow::new(100, 0).validate().unwrap_err();
        assert!(matches!(err, ImporterError::Config(_)));
    }

    #[test]
    fn test_out_of_range_history_is_a_config_error() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let err = ImportWindow::trailing(i64::MAX, now).unwrap_err();
        assert!(matches!(err, ImporterError::Config(_)));

        let err = ImportWindow::trailing(-1, now).unwrap_err();
        assert!(matches!(err, ImporterError::Config(_)));
    }

    #[test]
    fn test_options_from_config_reject_huge_history() {
        let config = Config::from_lookup(|key| match key {
            "DRY_RUN" => Some("true".to_string()),
            "HISTORY_DAYS" => Some(i64::MAX.to_string()),
            _ => None,
        })
        .unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        assert!(ImportOptions::from_config(&config, now).is_err());
    }

    #[tokio::test]
    async fn test_oversized_window_makes_no_requests() {
        let source = Arc::new(StubSource::new().with_coin("bitcoin", json!({}), prices(3)));
        let store = Arc::new(RecordingStore::new());
        let mut options = options();
        options.window = ImportWindow::new(0, 91 * DAY_SECS);

        let importer = Importer::new(source.clone(), store.clone(), options);
        let err = importer.run().await.unwrap_err();

        assert!(matches!(err, ImporterError::WindowTooLarge { .. }));
        assert!(source.requests().is_empty());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_platform_and_asset_keys_written_once_each() {
        let source = Arc::new(StubSource::new().with_coin(
            "usd-coin",
            json!({
                "ethereum": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                "solana": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            }),
            prices(10),
        ));
        let store = Arc::new(RecordingStore::new());

        let summary = Importer::new(source.clone(), store.clone(), options())
            .run()
            .await
            .unwrap();

        let writes = store.writes_per_pk();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes["ethereum:0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"], 1);
        assert_eq!(writes["solana:EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"], 1);
        assert_eq!(writes["asset#usd-coin"], 1);

        // Platform keys are written before the asset key
        let order: Vec<String> = store.calls().iter().map(|b| b[0].pk.clone()).collect();
        assert_eq!(order.last().map(String::as_str), Some("asset#usd-coin"));

        assert_eq!(summary.records_written, 30);
        assert_eq!(summary.coins_imported, 1);
    }

    #[tokio::test]
    async fn test_coin_failing_once_is_retried() {
        let source = Arc::new(
            StubSource::new()
                .with_coin("bitcoin", json!({ "": "" }), prices(30))
                .with_coin("ethereum", json!({}), prices(30))
                .with_coin("dogecoin", json!(null), prices(30))
                .failing("ethereum", 1),
        );
        let store = Arc::new(MemoryPriceStore::new());

        let summary = Importer::new(source.clone(), store.clone(), options())
            .run()
            .await
            .unwrap();

        assert_eq!(source.price_requests_for("bitcoin"), 1);
        assert_eq!(source.price_requests_for("ethereum"), 2);
        assert_eq!(source.price_requests_for("dogecoin"), 1);

        assert_eq!(
            store.partition_keys(),
            vec!["asset#bitcoin", "asset#dogecoin", "asset#ethereum"]
        );
        assert_eq!(store.len(), 90);

        assert_eq!(summary.coins_total, 3);
        assert_eq!(summary.coins_imported, 3);
        assert_eq!(summary.attempts, 4);
        assert!(summary.coins_skipped.is_empty());
    }

    #[tokio::test]
    async fn test_permanently_failing_coin_is_skipped() {
        let source = Arc::new(
            StubSource::new()
                .with_coin("bitcoin", json!({}), prices(5))
                .with_coin("delisted", json!({}), prices(5))
                .with_coin("ethereum", json!({}), prices(5))
                .failing("delisted", usize::MAX),
        );
        let store = Arc::new(MemoryPriceStore::new());
        let mut options = options();
        options.max_attempts_per_coin = 3;

        let summary = Importer::new(source.clone(), store.clone(), options)
            .run()
            .await
            .unwrap();

        assert_eq!(source.price_requests_for("delisted"), 3);
        assert_eq!(summary.coins_skipped, vec!["delisted".to_string()]);
        assert_eq!(summary.coins_imported, 2);
        assert_eq!(store.get("asset#ethereum", 1_700_000_000), Some(1.0));
    }

    #[tokio::test]
    async fn test_store_failure_retries_coin() {
        let source = Arc::new(StubSource::new().with_coin("bitcoin", json!({}), prices(5)));
        let store = Arc::new(RecordingStore::failing_for_pk("asset#bitcoin"));
        let mut options = options();
        options.max_attempts_per_coin = 2;

        let summary = Importer::new(source.clone(), store.clone(), options)
            .run()
            .await
            .unwrap();

        assert_eq!(store.calls().len(), 2);
        assert_eq!(summary.coins_skipped, vec!["bitcoin".to_string()]);
        assert_eq!(summary.records_written, 0);
    }

    #[tokio::test]
    async fn test_starting_index() {
        let source = Arc::new(
            StubSource::new()
                .with_coin("bitcoin", json!({}), prices(2))
                .with_coin("ethereum", json!({}), prices(2)),
        );
        let store = Arc::new(MemoryPriceStore::new());
        let mut options = options();
        options.starting_coin_index = 1;

        let summary = Importer::new(source.clone(), store.clone(), options.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(source.price_requests_for("bitcoin"), 0);
        assert_eq!(store.partition_keys(), vec!["asset#ethereum"]);
        assert_eq!(summary.coins_imported, 1);

        options.starting_coin_index = 10;
        let summary = Importer::new(source.clone(), store.clone(), options)
            .run()
            .await
            .unwrap();
        assert_eq!(summary.coins_imported, 0);
        assert_eq!(summary.attempts, 0);
    }

    #[tokio::test]
    async fn test_coin_list_failure_aborts_run() {
        let source = Arc::new(
            StubSource::new()
                .with_coin("bitcoin", json!({}), prices(2))
                .failing_coin_list(),
        );
        let store = Arc::new(MemoryPriceStore::new());

        let result = Importer::new(source.clone(), store.clone(), options()).run().await;

        assert!(matches!(result, Err(ImporterError::Upstream { status: 429, .. })));
        assert_eq!(source.requests(), vec!["list"]);
        assert!(store.is_empty());
    }
}
