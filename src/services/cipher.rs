//! Encryption of payloads at rest.
//!
//! The pipeline only sees the [`Cipher`] trait; key management lives outside
//! of it. [`AesGcmCipher`] is the bundled implementation: AES-256-GCM with a
//! random nonce per payload, framed as
//!
//! ```text
//! "DVE1" | nonce (12 bytes) | ciphertext + tag (16 bytes)
//! ```
//!
//! The magic prefix lets the read path probe whether stored bytes are
//! encrypted before attempting to decrypt them.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use std::fmt;
use thiserror::Error;

const ENVELOPE_MAGIC: &[u8; 4] = b"DVE1";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
    #[error("payload is not an encrypted envelope")]
    NotEncrypted,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed (wrong key or corrupted payload)")]
    Decrypt,
}

/// Collaborator boundary for payload encryption.
#[cfg_attr(test, mockall::automock)]
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
    fn is_encrypted(&self, data: &[u8]) -> bool;
}

pub struct AesGcmCipher {
    key: [u8; KEY_LEN],
}

impl fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl AesGcmCipher {
    pub fn from_key(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Fresh random key. Anything encrypted with it is unreadable once the
    /// process exits.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Key from standard base64 (32 raw bytes).
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let raw = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        let key: [u8; KEY_LEN] = raw
            .try_into()
            .map_err(|raw: Vec<u8>| {
                CipherError::InvalidKey(format!("expected 32 bytes, got {}", raw.len()))
            })?;
        Ok(Self { key })
    }

    fn cipher(&self) -> Result<Aes256Gcm, CipherError> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|e| CipherError::InvalidKey(e.to_string()))
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()?
            .encrypt(&nonce, plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        let mut out = Vec::with_capacity(ENVELOPE_MAGIC.len() + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(ENVELOPE_MAGIC);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if !self.is_encrypted(ciphertext) {
            return Err(CipherError::NotEncrypted);
        }
        let body = &ciphertext[ENVELOPE_MAGIC.len()..];
        let (nonce, sealed) = body.split_at(NONCE_LEN);

        self.cipher()?
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CipherError::Decrypt)
    }

    fn is_encrypted(&self, data: &[u8]) -> bool {
        data.len() >= ENVELOPE_MAGIC.len() + NONCE_LEN + TAG_LEN && data.starts_with(ENVELOPE_MAGIC)
    }
}
