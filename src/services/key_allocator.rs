//! Object key allocation.
//!
//! Keys look like `{entity_id}/{SEGMENT}_{timestamp_ms}_{token}.{ext}` where
//! `SEGMENT` is the logical document name folded to uppercase ASCII and
//! `token` is 9 random base36 characters. The timestamp plus token keeps
//! concurrent uploads for the same slot on distinct keys; the store refuses
//! to overwrite, so a collision is a hard failure rather than data loss.

use crate::{models::upload::StoredObjectKey, services::validation::ValidationError};
use chrono::Utc;
use rand::Rng;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

const MAX_SEGMENT_LEN: usize = 30;
const MAX_ENTITY_ID_LEN: usize = 128;
const MAX_EXTENSION_LEN: usize = 10;
const TOKEN_LEN: usize = 9;
const DEFAULT_EXTENSION: &str = "pdf";
const FALLBACK_SEGMENT: &str = "DOCUMENT";
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Allocate a fresh key for one upload.
pub fn allocate(
    entity_id: &str,
    document_name: &str,
    original_file_name: &str,
) -> Result<StoredObjectKey, ValidationError> {
    allocate_at(
        entity_id,
        document_name,
        original_file_name,
        Utc::now().timestamp_millis(),
        random_token(),
    )
}

/// Deterministic variant of [`allocate`] with caller-chosen time and token.
pub fn allocate_at(
    entity_id: &str,
    document_name: &str,
    original_file_name: &str,
    timestamp_ms: i64,
    token: String,
) -> Result<StoredObjectKey, ValidationError> {
    ensure_entity_id_safe(entity_id)?;

    Ok(StoredObjectKey {
        entity_id: entity_id.to_string(),
        logical_segment: normalize_segment(document_name),
        timestamp_ms,
        token,
        extension: extension_of(original_file_name),
    })
}

/// Entity ids become the first path segment, so only a conservative
/// character set is accepted.
fn ensure_entity_id_safe(entity_id: &str) -> Result<(), ValidationError> {
    let ok = !entity_id.is_empty()
        && entity_id.len() <= MAX_ENTITY_ID_LEN
        && entity_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidEntityId(entity_id.to_string()))
    }
}

/// Fold a document name into `[A-Z0-9_]`, at most 30 characters.
///
/// Diacritics are stripped ("Cédula" → "CEDULA"); runs of anything else
/// collapse into a single underscore.
pub fn normalize_segment(document_name: &str) -> String {
    let mut segment = String::with_capacity(document_name.len());
    for c in document_name.nfd().filter(|c| !is_combining_mark(*c)) {
        if c.is_ascii_alphanumeric() {
            segment.push(c.to_ascii_uppercase());
        } else if !segment.is_empty() && !segment.ends_with('_') {
            segment.push('_');
        }
    }
    segment.truncate(MAX_SEGMENT_LEN);
    let trimmed = segment.trim_end_matches('_');

    if trimmed.is_empty() {
        FALLBACK_SEGMENT.to_string()
    } else {
        trimmed.to_string()
    }
}

fn extension_of(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.bytes().all(|b| b.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

fn random_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}
