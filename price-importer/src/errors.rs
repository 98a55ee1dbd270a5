//! Error types for the price importer.
//!
//! Configuration problems fail a run before any network activity. Everything
//! raised while processing a single coin is caught by the import driver and
//! turned into a retry of that coin.

use thiserror::Error;

/// Main error type for the price importer.
#[derive(Error, Debug)]
pub enum ImporterError {
    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status
    #[error("Upstream request to {url} failed with status {status}")]
    Upstream { status: u16, url: String },

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database connection and query errors
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Database pool errors
    #[error("Database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested history is too long for hourly resolution
    #[error(
        "Import window spans {days} days, it needs to be at most 90 days in order to get hourly rates"
    )]
    WindowTooLarge { days: i64 },

    /// Store rejected a batch
    #[error("Store error: {0}")]
    Store(String),
}

impl ImporterError {
    /// Create a configuration error with a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a store error with a message.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

/// Result type alias using ImporterError.
pub type Result<T> = std::result::Result<T, ImporterError>;
