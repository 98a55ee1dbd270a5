//! Dataset Publisher Library
//!
//! Uploads derived datasets to a public S3 bucket. Hourly datasets carry an
//! `Expires` header so consumers refetch them shortly after the next
//! regeneration.

pub mod config;
pub mod errors;
pub mod publisher;

pub use config::PublisherConfig;
pub use errors::{PublisherError, Result};
pub use publisher::{cache_expiry, DatasetPublisher, ObjectBody, PublishOptions, UploadRequest};
