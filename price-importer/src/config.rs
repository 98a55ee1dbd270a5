//! Configuration module for the price importer.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::errors::{ImporterError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Public CoinGecko API root.
pub const DEFAULT_API_URL: &str = "https://api.coingecko.com/api/v3";

/// Main configuration struct for the importer.
#[derive(Debug, Clone)]
pub struct Config {
    /// CoinGecko API base URL (no trailing slash)
    pub coingecko_api_url: String,

    /// Optional CoinGecko API key, sent as `x-cg-pro-api-key`
    pub coingecko_api_key: Option<String>,

    /// Minimum spacing between upstream requests
    pub request_interval: Duration,

    /// Upstream HTTP request timeout
    pub http_timeout: Duration,

    /// How many days of history to import, ending now
    pub history_days: i64,

    /// Coin list index to resume from
    pub starting_coin_index: usize,

    /// Attempts per coin before it is skipped
    pub max_attempts_per_coin: u32,

    /// Write into an in-memory store instead of the database
    pub dry_run: bool,

    /// Database configuration
    pub database: DatabaseConfig,
}

/// Database connection configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub pool_max: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let dry_run = parse_or(&lookup, "DRY_RUN", false)?;

        let password = match lookup("DB_PASSWORD") {
            Some(password) => password,
            None if dry_run => String::new(),
            None => return Err(ImporterError::config("DB_PASSWORD is required")),
        };

        let max_attempts_per_coin = parse_or(&lookup, "MAX_ATTEMPTS_PER_COIN", 5u32)?;
        if max_attempts_per_coin == 0 {
            return Err(ImporterError::config(
                "MAX_ATTEMPTS_PER_COIN must be at least 1",
            ));
        }

        let history_days = parse_or(&lookup, "HISTORY_DAYS", 80i64)?;
        if history_days < 0 {
            return Err(ImporterError::config(format!(
                "HISTORY_DAYS must not be negative, got {}",
                history_days
            )));
        }

        Ok(Self {
            coingecko_api_url: lookup("COINGECKO_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),

            coingecko_api_key: lookup("COINGECKO_API_KEY").filter(|key| !key.is_empty()),

            request_interval: Duration::from_millis(parse_or(
                &lookup,
                "REQUEST_INTERVAL_MS",
                1500u64,
            )?),

            http_timeout: Duration::from_secs(parse_or(&lookup, "HTTP_TIMEOUT_SECS", 30u64)?),

            history_days,

            starting_coin_index: parse_or(&lookup, "STARTING_COIN_INDEX", 0usize)?,

            max_attempts_per_coin,

            dry_run,

            database: DatabaseConfig {
                host: lookup("DB_HOST").unwrap_or_else(|| "timescaledb".to_string()),
                port: parse_or(&lookup, "DB_PORT", 5432u16)?,
                name: lookup("DB_NAME").unwrap_or_else(|| "prices".to_string()),
                user: lookup("DB_USER").unwrap_or_else(|| "importer".to_string()),
                password,
                pool_max: parse_or(&lookup, "DB_POOL_MAX", 5usize)?,
            },
        })
    }
}

impl DatabaseConfig {
    /// Create a deadpool configuration.
    pub fn to_pool_config(&self) -> deadpool_postgres::Config {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.name.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ImporterError::config(format!("Invalid {}: {:?}", key, raw))),
        None => Ok(default),
    }
}
