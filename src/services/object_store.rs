//! The object-store capability the file service is built on.
//!
//! Implementations address objects by `(bucket, key)` and report failures as
//! [`StoreError`]. The file service never looks past this trait, so a remote
//! S3-compatible client and the bundled [`LocalObjectStore`] are interchangeable.
//!
//! [`LocalObjectStore`]: crate::services::local_store::LocalObjectStore

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::{collections::HashMap, fmt, io};
use thiserror::Error;

/// Streamed object payload.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Metadata key under which the file service records the creation time.
pub const CREATED_AT_METADATA: &str = "created_at";

/// Canned access policy attached to an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Acl {
    #[default]
    Private,
    PublicRead,
}

impl Acl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "public-read" => Acl::PublicRead,
            _ => Acl::Private,
        }
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for a single `put`.
#[derive(Clone, Debug, Default)]
pub struct PutObject {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    pub acl: Acl,
}

/// What the store knows about one object, without its payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub content_length: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
    pub acl: Acl,
}

/// One entry of a prefix listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Result of a single readiness probe.
#[derive(Clone, Debug)]
pub struct HealthCheck {
    pub name: &'static str,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` does not exist")]
    NoSuchBucket(String),
    /// The store has no record of the key.
    #[error("no such key `{0}`")]
    NoSuchKey(String),
    /// The key is known but its payload is gone.
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("key `{0}` rejected by the store")]
    InvalidKey(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation timed out")]
    Timeout,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("stored metadata unreadable: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` at `key`, replacing any existing object.
    async fn put(&self, bucket: &str, key: &str, body: ByteStream, opts: PutObject)
    -> StoreResult<()>;

    /// Fetch object metadata.
    async fn head(&self, bucket: &str, key: &str) -> StoreResult<ObjectHead>;

    /// Every object whose key starts with `prefix`, in the store's listing order.
    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectSummary>>;

    /// Server-side copy of `source` to `dest`.
    async fn copy(&self, bucket: &str, source: &str, dest: &str, acl: Acl) -> StoreResult<()>;

    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()>;

    /// Metadata plus a payload stream, for downloads.
    async fn open(&self, bucket: &str, key: &str) -> StoreResult<(ObjectHead, ByteStream)>;

    /// Readiness probes; stores without anything to probe report none.
    async fn health_checks(&self) -> Vec<HealthCheck> {
        Vec::new()
    }
}
