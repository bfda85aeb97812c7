//! Values exchanged with callers of the upload pipeline.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A file as received from an end user. Nothing about it is trusted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    /// File name declared by the client.
    pub file_name: String,
    /// MIME type declared by the client, if any.
    pub mime_type: Option<String>,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: Some(mime_type.into()),
            data: data.into(),
        }
    }

    /// Lowercased extension of the declared file name, if it has one.
    pub fn extension(&self) -> Option<String> {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    /// Declared MIME type without parameters, lowercased.
    pub fn essence_mime(&self) -> Option<String> {
        self.mime_type
            .as_deref()
            .and_then(|mime| mime.split(';').next())
            .map(|mime| mime.trim().to_ascii_lowercase())
            .filter(|mime| !mime.is_empty())
    }
}

/// A single upload, built by the caller and consumed once by the pipeline.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub entity_id: String,
    /// Logical document slot, e.g. "Certificado médico".
    pub document_name: String,
    pub file: Option<UploadedFile>,
    /// Key or signed URL of the file this upload supersedes.
    pub previous_file_reference: Option<String>,
}

impl UploadRequest {
    pub fn new(
        entity_id: impl Into<String>,
        document_name: impl Into<String>,
        file: UploadedFile,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            document_name: document_name.into(),
            file: Some(file),
            previous_file_reference: None,
        }
    }

    pub fn replacing(mut self, previous: impl Into<String>) -> Self {
        self.previous_file_reference = Some(previous.into());
        self
    }
}

/// Object key derived for one upload:
/// `{entity_id}/{SEGMENT}_{timestamp_ms}_{token}.{extension}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoredObjectKey {
    pub entity_id: String,
    pub logical_segment: String,
    pub timestamp_ms: i64,
    pub token: String,
    pub extension: String,
}

impl StoredObjectKey {
    pub fn unique_suffix(&self) -> String {
        format!("{}_{}", self.timestamp_ms, self.token)
    }

    /// Parse a key produced by the allocator. Returns `None` for anything
    /// that does not follow the persisted key format.
    pub fn parse(key: &str) -> Option<Self> {
        let (entity_id, file_name) = key.split_once('/')?;
        let (stem, extension) = file_name.rsplit_once('.')?;
        let (rest, token) = stem.rsplit_once('_')?;
        let (logical_segment, timestamp) = rest.rsplit_once('_')?;

        if entity_id.is_empty() || logical_segment.is_empty() || extension.is_empty() {
            return None;
        }
        if token.len() != 9 || !token.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        Some(Self {
            entity_id: entity_id.to_string(),
            logical_segment: logical_segment.to_string(),
            timestamp_ms: timestamp.parse().ok()?,
            token: token.to_string(),
            extension: extension.to_string(),
        })
    }
}

impl fmt::Display for StoredObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}_{}.{}",
            self.entity_id,
            self.logical_segment,
            self.unique_suffix(),
            self.extension
        )
    }
}

/// Failure categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad size, type or signature; the end user can fix it.
    Validation,
    /// Storage is misconfigured (e.g. a missing bucket); needs an operator.
    Operational,
    /// Generic failure talking to the object store.
    Transport,
    /// The referenced object does not exist.
    NotFound,
    /// The metadata operation failed and the upload was rolled back.
    Commit,
    /// The metadata operation failed and the rollback failed too: an
    /// orphaned object is left behind.
    Compensation,
}

/// Outcome of an upload, returned to the caller instead of an error.
///
/// The signed URL is valid for a fixed window; once expired it must be
/// re-issued through the gateway, not re-derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl UploadResult {
    pub fn succeeded(object_key: String, signed_url: String) -> Self {
        Self {
            success: true,
            signed_url: Some(signed_url),
            object_key: Some(object_key),
            failure_kind: None,
            failure_reason: None,
        }
    }

    pub fn failed(kind: FailureKind, reason: String, object_key: Option<String>) -> Self {
        Self {
            success: false,
            signed_url: None,
            object_key,
            failure_kind: Some(kind),
            failure_reason: Some(reason),
        }
    }
}
