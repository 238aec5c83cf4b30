//! Secure key/value façade over a physical backend.
//!
//! Every secure write stores two entries in one backend batch: the sealed
//! blob under `key` and the SHA-256 of its plaintext under `key_checksum`.
//! Raw slots bypass both encryption and checksums.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::backend::KvBackend;
use crate::crypto::{checksum_hex, decrypt, encrypt};
use crate::error::{Result, StoreError};
use crate::key_manager::KeyManager;

pub const CHECKSUM_SUFFIX: &str = "_checksum";

pub fn checksum_key(key: &str) -> String {
    format!("{key}{CHECKSUM_SUFFIX}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    #[default]
    Enabled,
    /// Blobs are stored in plaintext but still checksummed.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchReason {
    BlobMissing,
    ChecksumMissing,
    Undecryptable,
    DigestDiffers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairCheck {
    Absent,
    Intact,
    Mismatch(MismatchReason),
}

pub struct SecureBlobStore {
    backend: Arc<dyn KvBackend>,
    keys: Arc<KeyManager>,
    mode: EncryptionMode,
}

impl SecureBlobStore {
    pub fn new(backend: Arc<dyn KvBackend>, keys: Arc<KeyManager>, mode: EncryptionMode) -> Self {
        if mode == EncryptionMode::Disabled {
            warn!("secure blob store running with encryption disabled");
        }
        Self {
            backend,
            keys,
            mode,
        }
    }

    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    // ── Raw slots ───────────────────────────────────────────────────────────

    pub fn store_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        self.backend.set(key, value)
    }

    pub fn load_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.backend.get(key)
    }

    pub fn remove_raw(&self, key: &str) -> Result<()> {
        self.backend.remove(key)
    }

    // ── Sealed blobs ────────────────────────────────────────────────────────

    pub fn store(&self, key: &str, plaintext: &[u8]) -> Result<()> {
        self.store_with_raw(key, plaintext, &[])
    }

    /// Store a sealed blob and some raw slots in the same backend batch.
    pub fn store_with_raw(&self, key: &str, plaintext: &[u8], raw: &[(&str, &[u8])]) -> Result<()> {
        let checksum = checksum_hex(plaintext);
        let sealed = self.seal(plaintext)?;
        let checksum_key = checksum_key(key);
        let mut entries: Vec<(&str, &[u8])> = Vec::with_capacity(2 + raw.len());
        entries.push((key, sealed.as_slice()));
        entries.push((checksum_key.as_str(), checksum.as_bytes()));
        entries.extend_from_slice(raw);
        self.backend.set_batch(&entries)?;
        debug!(key, "secure blob stored");
        Ok(())
    }

    /// Load and verify a blob. `Ok(None)` only when neither the blob nor its
    /// checksum exists; a half-present or failing pair is an error.
    pub fn load(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let (blob, checksum) = self.read_pair(key)?;
        match (blob, checksum) {
            (None, None) => Ok(None),
            (Some(blob), Some(checksum)) => {
                let plaintext = self.open(&blob)?;
                if checksum_hex(&plaintext).as_bytes() != checksum.as_slice() {
                    return Err(StoreError::IntegrityMismatch {
                        key: key.to_string(),
                    });
                }
                Ok(Some(plaintext))
            }
            _ => Err(StoreError::IntegrityMismatch {
                key: key.to_string(),
            }),
        }
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let checksum_key = checksum_key(key);
        self.backend.remove_batch(&[key, checksum_key.as_str()])
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.backend.get(key)?.is_some())
    }

    /// Blob and checksum read as one batch.
    pub fn read_pair(&self, key: &str) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>)> {
        let checksum_key = checksum_key(key);
        let mut values = self.backend.get_batch(&[key, checksum_key.as_str()])?;
        let checksum = values.pop().flatten();
        let blob = values.pop().flatten();
        Ok((blob, checksum))
    }

    /// Classify the stored pair without modifying it. Fails only on backend
    /// errors or when the key is not available to decrypt.
    pub fn check(&self, key: &str) -> Result<PairCheck> {
        let (blob, checksum) = self.read_pair(key)?;
        self.classify(blob.as_deref(), checksum.as_deref())
    }

    /// Classify a pair already read with [`read_pair`](Self::read_pair).
    pub fn classify(&self, blob: Option<&[u8]>, checksum: Option<&[u8]>) -> Result<PairCheck> {
        let (blob, checksum) = match (blob, checksum) {
            (None, None) => return Ok(PairCheck::Absent),
            (None, Some(_)) => return Ok(PairCheck::Mismatch(MismatchReason::BlobMissing)),
            (Some(_), None) => return Ok(PairCheck::Mismatch(MismatchReason::ChecksumMissing)),
            (Some(b), Some(c)) => (b, c),
        };
        let plaintext = match self.open(blob) {
            Ok(p) => p,
            Err(StoreError::Authentication) => {
                return Ok(PairCheck::Mismatch(MismatchReason::Undecryptable))
            }
            Err(e) => return Err(e),
        };
        if checksum_hex(&plaintext).as_bytes() == checksum {
            Ok(PairCheck::Intact)
        } else {
            Ok(PairCheck::Mismatch(MismatchReason::DigestDiffers))
        }
    }

    /// Remove blob and checksum only if both still hold the bytes that were
    /// read. Returns `false` when a writer got in first.
    pub fn remove_if_unchanged(
        &self,
        key: &str,
        blob: Option<&[u8]>,
        checksum: Option<&[u8]>,
    ) -> Result<bool> {
        let checksum_key = checksum_key(key);
        self.backend
            .remove_batch_if_unchanged(&[(key, blob), (checksum_key.as_str(), checksum)])
    }

    // ── Convenience layers ──────────────────────────────────────────────────

    pub fn store_string(&self, key: &str, value: &str) -> Result<()> {
        self.store(key, value.as_bytes())
    }

    pub fn load_string(&self, key: &str) -> Result<Option<String>> {
        match self.load(key)? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| StoreError::Decode {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub fn store_value<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = Zeroizing::new(serde_json::to_vec(value)?);
        self.store(key, &bytes)
    }

    /// Typed read. Unusable ciphertext or a failing checksum reads as absent;
    /// malformed JSON is a `Decode` error so the caller can choose a default.
    pub fn load_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let bytes = match self.load(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(StoreError::Authentication) | Err(StoreError::IntegrityMismatch { .. }) => {
                warn!(key, "secure value unreadable, treating as absent");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Decode {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self.mode {
            EncryptionMode::Enabled => self
                .keys
                .with_key(|key| encrypt(key, plaintext))
                .map(|blob| blob.into_bytes()),
            EncryptionMode::Disabled => Ok(plaintext.to_vec()),
        }
    }

    fn open(&self, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        match self.mode {
            EncryptionMode::Enabled => self.keys.with_key(|key| decrypt(key, blob)),
            EncryptionMode::Disabled => Ok(Zeroizing::new(blob.to_vec())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn store_with(mode: EncryptionMode) -> (Arc<MemoryBackend>, SecureBlobStore) {
        let backend = Arc::new(MemoryBackend::new());
        let keys = Arc::new(KeyManager::new(backend.clone()));
        keys.ensure_key().unwrap();
        let store = SecureBlobStore::new(backend.clone(), keys, mode);
        (backend, store)
    }

    #[test]
    fn store_writes_blob_and_checksum() {
        let (backend, store) = store_with(EncryptionMode::Enabled);
        store.store("baby_data", b"{\"name\":\"Ava\"}").unwrap();
        let raw = backend.get("baby_data").unwrap().unwrap();
        assert_ne!(raw, b"{\"name\":\"Ava\"}");
        let checksum = backend.get("baby_data_checksum").unwrap().unwrap();
        assert_eq!(checksum, checksum_hex(b"{\"name\":\"Ava\"}").as_bytes());
        assert_eq!(
            store.load("baby_data").unwrap().unwrap().as_slice(),
            b"{\"name\":\"Ava\"}"
        );
        assert_eq!(store.check("baby_data").unwrap(), PairCheck::Intact);
    }

    #[test]
    fn tampered_blob_is_detected() {
        let (backend, store) = store_with(EncryptionMode::Enabled);
        store.store("security_settings", b"{}").unwrap();
        let mut raw = backend.get("security_settings").unwrap().unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        backend.set("security_settings", &raw).unwrap();
        assert_eq!(
            store.check("security_settings").unwrap(),
            PairCheck::Mismatch(MismatchReason::Undecryptable)
        );
        assert!(matches!(
            store.load("security_settings"),
            Err(StoreError::Authentication)
        ));
        assert_eq!(store.load_value::<serde_json::Value>("security_settings").unwrap(), None);
    }

    #[test]
    fn half_present_pairs_are_mismatches() {
        let (backend, store) = store_with(EncryptionMode::Enabled);
        store.store("a", b"1").unwrap();
        backend.remove("a_checksum").unwrap();
        assert_eq!(
            store.check("a").unwrap(),
            PairCheck::Mismatch(MismatchReason::ChecksumMissing)
        );
        backend.set("b_checksum", b"deadbeef").unwrap();
        assert_eq!(
            store.check("b").unwrap(),
            PairCheck::Mismatch(MismatchReason::BlobMissing)
        );
        assert_eq!(store.check("c").unwrap(), PairCheck::Absent);
    }

    #[test]
    fn disabled_mode_stores_plaintext_with_checksum() {
        let (backend, store) = store_with(EncryptionMode::Disabled);
        store.store_string("note", "hello").unwrap();
        assert_eq!(backend.get("note").unwrap().unwrap(), b"hello");
        assert_eq!(store.load_string("note").unwrap().as_deref(), Some("hello"));
        backend.set("note", b"hellO").unwrap();
        assert_eq!(
            store.check("note").unwrap(),
            PairCheck::Mismatch(MismatchReason::DigestDiffers)
        );
    }

    #[test]
    fn remove_clears_both_entries() {
        let (backend, store) = store_with(EncryptionMode::Enabled);
        store.store_value("user_preferences", &serde_json::json!({"x": 1})).unwrap();
        store.remove("user_preferences").unwrap();
        assert!(backend.get("user_preferences").unwrap().is_none());
        assert!(backend.get("user_preferences_checksum").unwrap().is_none());
    }

    #[test]
    fn sealed_ops_need_a_key() {
        let backend = Arc::new(MemoryBackend::new());
        let keys = Arc::new(KeyManager::new(backend.clone()));
        let store = SecureBlobStore::new(backend, keys, EncryptionMode::Enabled);
        assert!(matches!(store.store("x", b"1"), Err(StoreError::KeyUnavailable)));
        store.store_raw("raw", b"1").unwrap();
        assert_eq!(store.load_raw("raw").unwrap().unwrap(), b"1");
    }
}
