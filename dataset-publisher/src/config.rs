//! Configuration for the dataset publisher.
//!
//! Only the bucket is configured here. Credentials, region and endpoint come
//! from the AWS SDK's own environment handling.

use crate::errors::{PublisherError, Result};
use std::env;

/// Bucket datasets are published to unless overridden.
pub const DEFAULT_BUCKET: &str = "defillama-datasets";

/// Publisher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Destination bucket
    pub bucket: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
        }
    }
}

impl PublisherConfig {
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
        match lookup("DATASET_BUCKET") {
            None => Ok(Self::default()),
            Some(bucket) if bucket.trim().is_empty() => {
                Err(PublisherError::config("DATASET_BUCKET must not be empty"))
            }
            Some(bucket) => Ok(Self {
                bucket: bucket.trim().to_string(),
            }),
        }
    }
}
