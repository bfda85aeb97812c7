//! src/services/storage_service.rs
//!
//! Object store boundary plus the bundled local backend: SQLite for bucket
//! and object records, local disk for payloads sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`.
//!
//! Writes never overwrite. The object row is claimed first under a
//! `(bucket_id, key)` unique constraint, so a second write to the same key
//! fails before any bytes touch the disk.

use crate::{
    models::{bucket::Bucket, object::StoredObject},
    services::signing::UrlSigner,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::future::try_join_all;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Backend errors. Messages follow the "... not found" convention the
/// gateway relies on to classify failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("object `{key}` already exists in bucket `{bucket}`")]
    ObjectAlreadyExists { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Bucket-scoped blob store: no-overwrite put, get, batch delete and
/// signed-URL issuance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`. Fails if the key already exists.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
    ) -> StoreResult<StoredObject>;

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<(StoredObject, Bytes)>;

    /// Delete every listed key that exists; returns the keys actually removed.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StoreResult<Vec<String>>;

    async fn create_signed_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> StoreResult<String>;
}

/// Local disk + SQLite object store.
#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    signer: UrlSigner,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            signer,
        }
    }

    /// Rejects keys that could escape the bucket directory.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StoreError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StoreError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StoreError::InvalidObjectKey);
        }
        Ok(())
    }

    /// S3-like bucket naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    fn ensure_bucket_name_safe(&self, name: &str) -> StoreResult<()> {
        let invalid = |reason: &str| StoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard identifiers from MD5(bucket/key), keeping the file
    /// count per directory low.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<_, Bucket>("SELECT id, name, created_at FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StoreError::BucketNotFound(bucket.to_string()),
                other => StoreError::Sqlx(other),
            })
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StoreResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, bucket_id, key, filename, content_type, size_bytes, etag, last_modified
             FROM objects
             WHERE key = ? AND bucket_id = ?",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StoreError::Sqlx(other),
        })
    }

    /// Create a bucket and its directory. Duplicate names are rejected.
    pub async fn create_bucket(&self, name: &str) -> StoreResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        match sqlx::query("INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(bucket.id)
            .bind(&bucket.name)
            .bind(bucket.created_at)
            .execute(&*self.db)
            .await
        {
            Ok(_) => Ok(bucket),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    /// Write `data` to a temp file next to its final location, fsync it and
    /// rename it into place. The temp file is removed on any failure.
    async fn write_payload(&self, bucket_name: &str, key: &str, data: &[u8]) -> StoreResult<()> {
        let file_path = self.object_path(bucket_name, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &file_path).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        Ok(())
    }

    /// Remove one object row and payload. Returns false if it did not exist.
    async fn delete_one(&self, bucket: &Bucket, key: &str) -> StoreResult<bool> {
        self.ensure_key_safe(key)?;
        let result = sqlx::query("DELETE FROM objects WHERE key = ? AND bucket_id = ?")
            .bind(key)
            .bind(bucket.id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        let file_path = self.object_path(&bucket.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root(&bucket.name))
                .await;
        }
        Ok(true)
    }

    /// Remove empty directories from `start` upwards, stopping at `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
    ) -> StoreResult<StoredObject> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let object = StoredObject {
            id: Uuid::new_v4(),
            bucket_id: bucket_rec.id,
            key: key.to_string(),
            filename: key.rsplit('/').next().unwrap_or(key).to_string(),
            content_type,
            size_bytes: data.len() as i64,
            etag: Some(format!("{:x}", md5::compute(&data))),
            last_modified: Utc::now(),
        };

        let claimed = sqlx::query(
            "INSERT INTO objects (
                id, bucket_id, key, filename, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(object.id)
        .bind(object.bucket_id)
        .bind(&object.key)
        .bind(&object.filename)
        .bind(&object.content_type)
        .bind(object.size_bytes)
        .bind(&object.etag)
        .bind(object.last_modified)
        .execute(&*self.db)
        .await;

        match claimed {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::ObjectAlreadyExists {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            }
            Err(err) => return Err(StoreError::Sqlx(err)),
        }

        if let Err(err) = self.write_payload(&bucket_rec.name, key, &data).await {
            // release the claimed key so the row never points at nothing
            if let Err(release) = sqlx::query("DELETE FROM objects WHERE id = ?")
                .bind(object.id)
                .execute(&*self.db)
                .await
            {
                warn!(
                    bucket,
                    key,
                    error = %release,
                    "failed to release claimed object row, key stays reserved without a payload"
                );
            }
            return Err(err);
        }

        Ok(object)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<(StoredObject, Bytes)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let data = fs::read(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StoreError::Io(err)
            }
        })?;

        Ok((object, Bytes::from(data)))
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StoreResult<Vec<String>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let removed =
            try_join_all(keys.iter().map(|key| self.delete_one(&bucket_rec, key))).await?;

        Ok(keys
            .iter()
            .zip(removed)
            .filter_map(|(key, removed)| removed.then(|| key.clone()))
            .collect())
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> StoreResult<String> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await?;
        Ok(self.signer.sign(&bucket_rec.name, key, ttl))
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
