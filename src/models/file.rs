//! Represents a file owned by a user, addressed by its object key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A snapshot of one stored object as seen through the user's path space.
///
/// The all-zero value (`File::default()`) is the "not found" sentinel and never
/// describes a real file, not even a zero-byte one. Use [`File::is_empty`]
/// before treating a value as present.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct File {
    /// Object key, globally unique (`<user>/<path>/<name>`).
    pub id: String,

    /// File name, the last key segment.
    pub name: String,

    /// Virtual directory the file lives in.
    pub path: String,

    /// Owner identifier.
    pub user: u64,

    /// Size in bytes.
    pub size: u64,

    /// MIME type, empty when unknown.
    pub content_type: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl File {
    /// True when every field holds its zero value.
    pub fn is_empty(&self) -> bool {
        *self == File::default()
    }
}
