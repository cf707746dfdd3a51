//! Authenticated encryption for stored payloads.
//!
//! Blobs are AES-256-GCM ciphertexts with the 12-byte random nonce prepended:
//! `nonce || ciphertext || tag`.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{AppError, Result};

pub const NONCE_LEN: usize = 12;

/// Process-wide payload key
#[derive(Clone)]
pub struct VaultKey {
    cipher: Aes256Gcm,
}

impl VaultKey {
    /// Derive the AES-256 key from an operator secret (SHA-256 of the secret bytes)
    pub fn from_secret(secret: &[u8]) -> Self {
        let digest: [u8; 32] = Sha256::digest(secret).into();
        Self::from_bytes(digest)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&bytes.into()),
        }
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

/// Encrypt `plaintext` under a fresh random nonce
pub fn seal(plaintext: &[u8], key: &VaultKey) -> Result<Vec<u8>> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = key
        .cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| AppError::Internal(format!("AES-256-GCM encryption failed: {}", e)))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a blob produced by [`seal`]
pub fn open(sealed: &[u8], key: &VaultKey) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(AppError::DecryptionFailed(format!(
            "ciphertext is {} bytes, shorter than the nonce",
            sealed.len()
        )));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    key.cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| AppError::DecryptionFailed("authentication tag mismatch".to_string()))
}
