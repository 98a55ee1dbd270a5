//! Historical Price Importer Library
//!
//! This crate provides components for importing hourly coin prices
//! from CoinGecko into a key-value time-series store.

pub mod coingecko;
pub mod config;
pub mod database;
pub mod errors;
pub mod importer;
pub mod platforms;
pub mod rate_limit;
pub mod store;

#[cfg(test)]
mod testing;

pub use coingecko::{CoinDetail, CoinGeckoClient, CoinListEntry, PricePair, PriceRange, PriceSource};
pub use config::Config;
pub use database::PostgresPriceStore;
pub use errors::{ImporterError, Result};
pub use importer::{ImportOptions, ImportSummary, ImportWindow, Importer};
pub use platforms::{asset_key, for_each_platform_key, platform_keys};
pub use rate_limit::RequestGate;
pub use store::{build_batches, store_prices, MemoryPriceStore, PriceRecord, PriceStore};
