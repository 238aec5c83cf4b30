//! Authenticated encryption and digests.
//!
//! Uses XChaCha20-Poly1305 (192-bit random nonce). Key: 32 bytes. Tag: 16 bytes.
//!
//! Blob wire format:
//!   [ nonce (24 bytes) | ciphertext + tag ]

use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Result, StoreError};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// 256-bit symmetric key. Zeroized on drop; `Debug` never prints the bytes.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            StoreError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn generate(entropy: &dyn EntropySource) -> Result<Self> {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        entropy
            .fill(&mut bytes[..])
            .map_err(StoreError::KeyGeneration)?;
        Ok(Self(*bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Short non-secret identifier: first 8 bytes of SHA-256 over the key.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(<redacted>)")
    }
}

/// Source of cryptographically secure random bytes.
pub trait EntropySource: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> std::result::Result<(), String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> std::result::Result<(), String> {
        OsRng.try_fill_bytes(dest).map_err(|e| e.to_string())
    }
}

/// Nonce-prefixed AEAD output.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedBlob(Vec<u8>);

impl EncryptedBlob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for EncryptedBlob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedBlob({} bytes)", self.0.len())
    }
}

/// Encrypt `plaintext`, prepending a fresh random nonce.
pub fn encrypt(key: &Key, plaintext: &[u8]) -> Result<EncryptedBlob> {
    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| StoreError::Encrypt)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| StoreError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(EncryptedBlob(out))
}

/// Decrypt wire-format bytes (nonce || ciphertext+tag). Any malformed or
/// tampered input yields `StoreError::Authentication`.
pub fn decrypt(key: &Key, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(StoreError::Authentication);
    }
    let (nonce_bytes, ct) = blob.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| StoreError::Authentication)?;
    let plaintext = cipher
        .decrypt(nonce, ct)
        .map_err(|_| StoreError::Authentication)?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt a UTF-8 string and base64 encode the blob for text storage.
pub fn encrypt_string(key: &Key, plaintext: &str) -> Result<String> {
    let blob = encrypt(key, plaintext.as_bytes())?;
    Ok(general_purpose::STANDARD.encode(blob.as_bytes()))
}

pub fn decrypt_string(key: &Key, encoded: &str) -> Result<String> {
    let blob = general_purpose::STANDARD.decode(encoded)?;
    let plaintext = decrypt(key, &blob)?;
    String::from_utf8(plaintext.to_vec()).map_err(|_| StoreError::Authentication)
}

/// SHA-256 hex digest used for blob checksums.
pub fn checksum_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
