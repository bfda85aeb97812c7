//! Represents an object (file) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata of a single stored blob.
///
/// The payload bytes live on disk; this record only describes them. The
/// content type is the one declared at upload time, even when the bytes at
/// rest are ciphertext.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Last path segment of the key.
    pub filename: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes of the payload at rest.
    pub size_bytes: i64,

    /// MD5 checksum of the payload at rest.
    pub etag: Option<String>,

    /// Timestamp when the object was written.
    pub last_modified: DateTime<Utc>,
}
