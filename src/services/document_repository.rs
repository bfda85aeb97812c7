//! src/services/document_repository.rs
//!
//! Metadata side of an upload: which object is the current file for a
//! document slot. Written by the commit step of the upload saga.

use crate::models::{bucket::EntityClass, document::DocumentRecord};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct DocumentRepository {
    db: Arc<SqlitePool>,
}

impl DocumentRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Point a document slot at a stored object, replacing any previous
    /// pointer for the same slot.
    pub async fn link(
        &self,
        class: EntityClass,
        entity_id: &str,
        document_name: &str,
        object_key: &str,
        file_url: &str,
    ) -> sqlx::Result<DocumentRecord> {
        let record = sqlx::query_as::<_, DocumentRecord>(
            r#"
            INSERT INTO documents (entity_class, entity_id, document_name, object_key, file_url, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (entity_class, entity_id, document_name) DO UPDATE SET
                object_key = excluded.object_key,
                file_url = excluded.file_url,
                updated_at = excluded.updated_at
            RETURNING entity_class, entity_id, document_name, object_key, file_url, updated_at
            "#,
        )
        .bind(class.as_str())
        .bind(entity_id)
        .bind(document_name)
        .bind(object_key)
        .bind(file_url)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        debug!(
            entity_class = %class,
            entity_id,
            document_name,
            object_key,
            "document pointer updated"
        );
        Ok(record)
    }

    /// Clear every slot that points at `object_key`. Returns the number of
    /// slots cleared.
    pub async fn unlink_object(&self, class: EntityClass, object_key: &str) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE entity_class = ? AND object_key = ?")
            .bind(class.as_str())
            .bind(object_key)
            .execute(&*self.db)
            .await?;

        debug!(
            entity_class = %class,
            object_key,
            cleared = result.rows_affected(),
            "document pointer removed"
        );
        Ok(result.rows_affected())
    }

    pub async fn find(
        &self,
        class: EntityClass,
        entity_id: &str,
        document_name: &str,
    ) -> sqlx::Result<Option<DocumentRecord>> {
        sqlx::query_as::<_, DocumentRecord>(
            r#"
            SELECT entity_class, entity_id, document_name, object_key, file_url, updated_at
            FROM documents
            WHERE entity_class = ? AND entity_id = ? AND document_name = ?
            "#,
        )
        .bind(class.as_str())
        .bind(entity_id)
        .bind(document_name)
        .fetch_optional(&*self.db)
        .await
    }
}
