//! Historical Price Importer
//!
//! Walks the CoinGecko coin list once and stores ~80 days of hourly USD
//! prices per coin, keyed by `asset#<coinId>` and by every platform the coin
//! is deployed on.
//!
//! ## Features
//! - Shared request gate spacing upstream calls
//! - Concurrent batched writes of at most 25 records
//! - Bounded per-coin retries, then skip-and-log
//! - Dry-run mode writing into memory
//! - Graceful exit on SIGTERM / Ctrl+C

use price_importer::{
    CoinGeckoClient, Config, ImportOptions, Importer, MemoryPriceStore, PostgresPriceStore,
    PriceStore, RequestGate, Result,
};

use chrono::Utc;
use std::env;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore errors if not found)
    let _ = dotenvy::dotenv();
    init_tracing(&env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));

    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e);
        }
    };

    // Reject the window before opening any connection
    let options = match ImportOptions::from_config(&config, Utc::now())
        .and_then(|options| options.window.validate().map(|_| options))
    {
        Ok(options) => options,
        Err(e) => {
            error!("Invalid import window: {}", e);
            return Err(e);
        }
    };

    info!("Starting historical price import");
    info!("  CoinGecko API: {}", config.coingecko_api_url);
    info!("  Request interval: {:?}", config.request_interval);
    info!("  History: {} days", config.history_days);
    info!("  Starting coin index: {}", config.starting_coin_index);

    let gate = Arc::new(RequestGate::new(config.request_interval));
    let source = Arc::new(CoinGeckoClient::from_config(&config, gate)?);

    let dry_run_store = config.dry_run.then(|| Arc::new(MemoryPriceStore::new()));
    let store: Arc<dyn PriceStore> = if let Some(memory) = &dry_run_store {
        warn!("Dry run: prices are kept in memory only");
        memory.clone()
    } else {
        info!(
            "Connecting to database {}:{}/{}...",
            config.database.host, config.database.port, config.database.name
        );
        let store = match PostgresPriceStore::new(&config.database).await {
            Ok(store) => store,
            Err(e) => {
                error!("Failed to connect to database: {}", e);
                return Err(e);
            }
        };
        store.ensure_schema().await?;
        Arc::new(store)
    };

    let importer = Importer::new(source.clone(), store, options);

    tokio::select! {
        result = importer.run() => {
            let summary = result?;
            info!(
                "Imported {} of {} coins using {} requests",
                summary.coins_imported,
                summary.coins_total,
                source.requests_sent()
            );
            if !summary.coins_skipped.is_empty() {
                warn!("Skipped coins: {}", summary.coins_skipped.join(", "));
            }
        }
        _ = wait_for_shutdown() => {
            warn!(
                "Shutdown signal received, stopping import after {} requests",
                source.requests_sent()
            );
        }
    }

    if let Some(memory) = dry_run_store {
        info!(
            "Dry run kept {} records from {} batch writes",
            memory.len(),
            memory.batch_writes()
        );
    }

    info!("Historical price import stopped");
    Ok(())
}

/// Initialize tracing subscriber.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
