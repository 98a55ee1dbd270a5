//! S3 upload of public datasets.
//!
//! Objects are always uploaded `public-read`. Hourly datasets also get an
//! `Expires` header at 21 minutes past the next hour, a JSON content type and,
//! when the body is brotli-compressed, a `br` content encoding.

use crate::config::PublisherConfig;
use crate::errors::{PublisherError, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, DateTime as S3DateTime};
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use std::path::Path;
use tracing::{debug, info};

const HOURLY_CONTENT_TYPE: &str = "application/json";
const BROTLI_ENCODING: &str = "br";

/// When an hourly dataset generated at `now` stops being fresh: the next
/// top of the hour plus 21 minutes.
pub fn cache_expiry<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let top_of_hour = now.clone()
        - Duration::minutes(i64::from(now.minute()))
        - Duration::seconds(i64::from(now.second()))
        - Duration::nanoseconds(i64::from(now.nanosecond()));

    top_of_hour + Duration::hours(1) + Duration::minutes(21)
}

/// Upload flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// Attach hourly cache headers
    pub hourly_cache: bool,
    /// Body is brotli-compressed; only honored with `hourly_cache`
    pub compressed: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            hourly_cache: false,
            compressed: true,
        }
    }
}

impl PublishOptions {
    /// Hourly-refreshed, brotli-compressed JSON.
    pub fn hourly() -> Self {
        Self {
            hourly_cache: true,
            compressed: true,
        }
    }
}

/// Object contents.
#[derive(Debug)]
pub enum ObjectBody {
    Text(String),
    Binary(Vec<u8>),
    Stream(ByteStream),
}

impl ObjectBody {
    /// Stream a file from disk.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        ByteStream::from_path(path)
            .await
            .map(ObjectBody::Stream)
            .map_err(|e| PublisherError::body(format!("{}: {}", path.display(), e)))
    }

    fn into_byte_stream(self) -> ByteStream {
        match self {
            ObjectBody::Text(text) => ByteStream::from(text.into_bytes()),
            ObjectBody::Binary(bytes) => ByteStream::from(bytes),
            ObjectBody::Stream(stream) => stream,
        }
    }
}

impl From<String> for ObjectBody {
    fn from(text: String) -> Self {
        ObjectBody::Text(text)
    }
}

impl From<&str> for ObjectBody {
    fn from(text: &str) -> Self {
        ObjectBody::Text(text.to_string())
    }
}

impl From<Vec<u8>> for ObjectBody {
    fn from(bytes: Vec<u8>) -> Self {
        ObjectBody::Binary(bytes)
    }
}

/// Everything sent with an upload except the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub bucket: String,
    pub key: String,
    pub acl: ObjectCannedAcl,
    pub expires: Option<DateTime<Utc>>,
    pub content_encoding: Option<&'static str>,
    pub content_type: Option<&'static str>,
}

impl UploadRequest {
    /// Resolve upload headers for `key` as of `now`.
    pub fn new(bucket: &str, key: &str, options: PublishOptions, now: DateTime<Utc>) -> Self {
        let mut request = Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            acl: ObjectCannedAcl::PublicRead,
            expires: None,
            content_encoding: None,
            content_type: None,
        };

        if options.hourly_cache {
            request.expires = Some(cache_expiry(&now));
            request.content_type = Some(HOURLY_CONTENT_TYPE);
            if options.compressed {
                request.content_encoding = Some(BROTLI_ENCODING);
            }
        }

        request
    }
}

/// Publishes datasets to one bucket.
#[derive(Debug, Clone)]
pub struct DatasetPublisher {
    client: Client,
    bucket: String,
}

impl DatasetPublisher {
    /// Create a publisher over an existing S3 client.
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Create a publisher from the ambient AWS configuration.
    pub async fn from_env() -> Result<Self> {
        let config = PublisherConfig::from_env()?;
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Ok(Self::new(Client::new(&sdk_config), config.bucket))
    }

    /// Upload `body` under `name`.
    pub async fn store(
        &self,
        name: &str,
        body: impl Into<ObjectBody>,
        options: PublishOptions,
    ) -> Result<()> {
        let request = UploadRequest::new(&self.bucket, name, options, Utc::now());
        self.upload(request, body.into()).await
    }

    async fn upload(&self, request: UploadRequest, body: ObjectBody) -> Result<()> {
        debug!(
            "Uploading {} (expires: {:?}, encoding: {:?})",
            request.key, request.expires, request.content_encoding
        );

        self.client
            .put_object()
            .bucket(&request.bucket)
            .key(&request.key)
            .acl(request.acl.clone())
            .body(body.into_byte_stream())
            .set_expires(
                request
                    .expires
                    .map(|expires| S3DateTime::from_secs(expires.timestamp())),
            )
            .set_content_encoding(request.content_encoding.map(str::to_string))
            .set_content_type(request.content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| PublisherError::Upload {
                bucket: request.bucket.clone(),
                key: request.key.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        info!("Published {} to {}", request.key, request.bucket);
        Ok(())
    }
}
