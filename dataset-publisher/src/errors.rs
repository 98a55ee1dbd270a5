//! Error types for the dataset publisher.

use thiserror::Error;

/// Main error type for the dataset publisher.
#[derive(Error, Debug)]
pub enum PublisherError {
    /// The object store rejected or failed the upload
    #[error("Upload of {key} to {bucket} failed: {message}")]
    Upload {
        bucket: String,
        key: String,
        message: String,
    },

    /// Reading a streamed body failed
    #[error("Body error: {0}")]
    Body(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PublisherError {
    /// Create a configuration error with a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a body error with a message.
    pub fn body(msg: impl Into<String>) -> Self {
        Self::Body(msg.into())
    }
}

/// Result type alias using PublisherError.
pub type Result<T> = std::result::Result<T, PublisherError>;
