//! Represents an object (file payload + metadata) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata row for a single object within a bucket.
///
/// The payload bytes live on disk; this row records where they belong and
/// what the store knows about them.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload.
    pub etag: Option<String>,

    /// Canned access policy (`private` or `public-read`).
    pub acl: String,

    /// User metadata as a JSON object of string values.
    pub metadata: String,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,
}
