//! Time-limited signed URLs.
//!
//! A signed URL grants read access to one object until `expires` (unix
//! seconds). The signature is an HMAC-SHA256 over bucket, key and expiry,
//! URL-safe base64 encoded:
//!
//! ```text
//! {base_url}/signed/{bucket}/{key}?expires={unix_secs}&signature={b64url}
//! ```

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Literal path segment preceding the bucket name in signed URLs.
pub const SIGNED_PATH: &str = "signed";

#[derive(Clone)]
pub struct UrlSigner {
    mac: HmacSha256,
    base_url: String,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(
        secret: &[u8],
        base_url: impl Into<String>,
    ) -> Result<Self, hmac::digest::InvalidLength> {
        let base_url: String = base_url.into();
        Ok(Self {
            mac: HmacSha256::new_from_slice(secret)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Sign `bucket/key` for `ttl` from now.
    pub fn sign(&self, bucket: &str, key: &str, ttl: Duration) -> String {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl_secs);
        self.sign_until(bucket, key, expires)
    }

    pub fn sign_until(&self, bucket: &str, key: &str, expires: i64) -> String {
        let digest = self.digest(bucket, key, expires).finalize().into_bytes();
        let signature = URL_SAFE_NO_PAD.encode(digest);
        format!(
            "{}/{}/{}/{}?expires={}&signature={}",
            self.base_url, SIGNED_PATH, bucket, key, expires, signature
        )
    }

    /// True when the signature matches and `expires` is still in the future.
    pub fn verify(&self, bucket: &str, key: &str, expires: i64, signature: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let Ok(raw) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        self.digest(bucket, key, expires).verify_slice(&raw).is_ok()
    }

    fn digest(&self, bucket: &str, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(bucket.as_bytes());
        mac.update(b"\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }
}

/// Recover the object key from a full signed URL by locating the literal
/// bucket segment and taking everything after it, minus the query string.
pub fn extract_object_key(url: &str, bucket: &str) -> Option<String> {
    let marker = format!("/{}/", bucket);
    let start = url.find(&marker)? + marker.len();
    let rest = &url[start..];
    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    let key = &rest[..end];
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}
