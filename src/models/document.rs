//! The metadata-side pointer from a logical document slot to its file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One current file per (entity class, entity, document name) slot.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct DocumentRecord {
    pub entity_class: String,
    pub entity_id: String,
    pub document_name: String,
    /// Object key inside the entity class bucket.
    pub object_key: String,
    /// Signed URL handed out when the file was committed.
    pub file_url: String,
    pub updated_at: DateTime<Utc>,
}
