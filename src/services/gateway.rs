//! Storage gateway: the thin transport between the pipeline and an
//! [`ObjectStore`], scoped by [`EntityClass`].
//!
//! Store failures are classified by their message, the convention object
//! stores share: "not found" on a write (or "bucket ... not found" on any
//! call) means the bucket itself is missing, which is an operator problem,
//! not a transient I/O failure.

use crate::{
    models::{
        bucket::{BucketNames, EntityClass},
        object::StoredObject,
    },
    services::storage_service::{ObjectStore, StoreError},
};
use bytes::Bytes;
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The bucket backing an entity class does not exist.
    #[error("storage bucket `{bucket}` is not available, check the storage configuration ({message})")]
    BucketMisconfigured { bucket: String, message: String },
    #[error("object `{key}` not found")]
    NotFound { key: String },
    #[error("object `{key}` already exists")]
    AlreadyExists { key: String },
    #[error("storage failure: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Put,
    Get,
    Delete,
    Sign,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Put => "put",
            Operation::Get => "get",
            Operation::Delete => "delete",
            Operation::Sign => "sign",
        })
    }
}

/// Map a store error into the gateway taxonomy by inspecting its message.
fn classify(op: Operation, bucket: &str, key: &str, err: StoreError) -> GatewayError {
    let message = err.to_string();
    let lowered = message.to_ascii_lowercase();

    if lowered.contains("already exists") {
        return GatewayError::AlreadyExists {
            key: key.to_string(),
        };
    }
    if lowered.contains("not found") {
        let bucket_missing = op == Operation::Put
            || lowered.contains("bucket not found")
            || lowered.starts_with("bucket");
        return if bucket_missing {
            GatewayError::BucketMisconfigured {
                bucket: bucket.to_string(),
                message,
            }
        } else {
            GatewayError::NotFound {
                key: key.to_string(),
            }
        };
    }
    GatewayError::Transport(format!("{op} `{key}` in `{bucket}`: {message}"))
}

#[derive(Clone)]
pub struct StorageGateway {
    store: Arc<dyn ObjectStore>,
    buckets: BucketNames,
}

impl StorageGateway {
    pub fn new(store: Arc<dyn ObjectStore>, buckets: BucketNames) -> Self {
        Self { store, buckets }
    }

    pub fn bucket_name(&self, class: EntityClass) -> &str {
        self.buckets.name_for(class)
    }

    pub fn buckets(&self) -> &BucketNames {
        &self.buckets
    }

    /// Write a new object. Never overwrites.
    pub async fn put(
        &self,
        class: EntityClass,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<StoredObject, GatewayError> {
        let bucket = self.bucket_name(class);
        self.store
            .put_object(bucket, key, data, Some(content_type.to_string()))
            .await
            .map_err(|err| classify(Operation::Put, bucket, key, err))
    }

    pub async fn get(
        &self,
        class: EntityClass,
        key: &str,
    ) -> Result<(StoredObject, Bytes), GatewayError> {
        let bucket = self.bucket_name(class);
        self.store
            .get_object(bucket, key)
            .await
            .map_err(|err| classify(Operation::Get, bucket, key, err))
    }

    /// Delete a single object; a key that does not exist is `NotFound`.
    pub async fn delete(&self, class: EntityClass, key: &str) -> Result<(), GatewayError> {
        let removed = self.delete_many(class, &[key.to_string()]).await?;
        if removed.iter().any(|k| k == key) {
            Ok(())
        } else {
            Err(GatewayError::NotFound {
                key: key.to_string(),
            })
        }
    }

    pub async fn delete_many(
        &self,
        class: EntityClass,
        keys: &[String],
    ) -> Result<Vec<String>, GatewayError> {
        let bucket = self.bucket_name(class);
        self.store
            .delete_objects(bucket, keys)
            .await
            .map_err(|err| classify(Operation::Delete, bucket, &keys.join(","), err))
    }

    pub async fn signed_url(
        &self,
        class: EntityClass,
        key: &str,
        ttl: Duration,
    ) -> Result<String, GatewayError> {
        let bucket = self.bucket_name(class);
        self.store
            .create_signed_url(bucket, key, ttl)
            .await
            .map_err(|err| classify(Operation::Sign, bucket, key, err))
    }
}
