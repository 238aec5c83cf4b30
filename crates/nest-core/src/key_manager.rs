//! Owner of the install-wide symmetric key.
//!
//! The key is generated once, written to a raw (unencrypted) slot and loaded
//! on every cold start. Other components never hold a copy: they borrow it
//! through [`KeyManager::with_key`].

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::backend::KvBackend;
use crate::crypto::{EntropySource, Key, OsEntropy};
use crate::error::{Result, StoreError};

pub const KEY_SLOT: &str = "device_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// No key existed; a fresh one was generated and persisted.
    Generated,
    /// Loaded from the key slot.
    Loaded,
    /// Already held in memory by this manager.
    Cached,
}

pub struct KeyManager {
    slot: Arc<dyn KvBackend>,
    entropy: Arc<dyn EntropySource>,
    key: RwLock<Option<Key>>,
}

impl KeyManager {
    pub fn new(slot: Arc<dyn KvBackend>) -> Self {
        Self::with_entropy(slot, Arc::new(OsEntropy))
    }

    pub fn with_entropy(slot: Arc<dyn KvBackend>, entropy: Arc<dyn EntropySource>) -> Self {
        Self {
            slot,
            entropy,
            key: RwLock::new(None),
        }
    }

    pub fn ensure_key(&self) -> Result<KeyOrigin> {
        let mut guard = self.key.write();
        if guard.is_some() {
            return Ok(KeyOrigin::Cached);
        }

        if let Some(stored) = self.slot.get(KEY_SLOT)? {
            let stored = Zeroizing::new(stored);
            let key = Key::from_bytes(&stored)?;
            info!(fingerprint = %key.fingerprint(), "device key loaded");
            *guard = Some(key);
            return Ok(KeyOrigin::Loaded);
        }

        let key = Key::generate(self.entropy.as_ref()).map_err(|e| {
            error!("device key generation failed, secure storage unavailable");
            e
        })?;
        self.slot.set(KEY_SLOT, key.as_bytes())?;
        info!(fingerprint = %key.fingerprint(), "device key generated");
        *guard = Some(key);
        Ok(KeyOrigin::Generated)
    }

    pub fn has_key(&self) -> bool {
        self.key.read().is_some()
    }

    /// Run `f` with the key borrowed. Fails with `KeyUnavailable` until
    /// [`ensure_key`](Self::ensure_key) has succeeded.
    pub fn with_key<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Key) -> Result<R>,
    {
        let guard = self.key.read();
        match guard.as_ref() {
            Some(key) => f(key),
            None => Err(StoreError::KeyUnavailable),
        }
    }

    pub fn fingerprint(&self) -> Option<String> {
        self.key.read().as_ref().map(Key::fingerprint)
    }

    /// Device-level reset: drops the in-memory key and deletes the slot.
    /// Anything encrypted under the old key becomes unreadable.
    pub fn wipe(&self) -> Result<()> {
        let mut guard = self.key.write();
        self.slot.remove(KEY_SLOT)?;
        *guard = None;
        warn!("device key wiped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    struct BrokenEntropy;

    impl EntropySource for BrokenEntropy {
        fn fill(&self, _dest: &mut [u8]) -> std::result::Result<(), String> {
            Err("no entropy".into())
        }
    }

    #[test]
    fn key_is_stable_within_and_across_restarts() {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let first = KeyManager::new(backend.clone());
        assert_eq!(first.ensure_key().unwrap(), KeyOrigin::Generated);
        assert_eq!(first.ensure_key().unwrap(), KeyOrigin::Cached);
        let bytes_a = first.with_key(|k| Ok(k.as_bytes().to_vec())).unwrap();

        let restarted = KeyManager::new(backend);
        assert_eq!(restarted.ensure_key().unwrap(), KeyOrigin::Loaded);
        let bytes_b = restarted.with_key(|k| Ok(k.as_bytes().to_vec())).unwrap();
        assert_eq!(bytes_a, bytes_b);
        assert_eq!(first.fingerprint(), restarted.fingerprint());
    }

    #[test]
    fn key_unavailable_before_ensure() {
        let manager = KeyManager::new(Arc::new(MemoryBackend::new()));
        assert!(!manager.has_key());
        assert!(matches!(
            manager.with_key(|_| Ok(())),
            Err(StoreError::KeyUnavailable)
        ));
    }

    #[test]
    fn generation_failure_leaves_slot_empty() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = KeyManager::with_entropy(backend.clone(), Arc::new(BrokenEntropy));
        assert!(matches!(
            manager.ensure_key(),
            Err(StoreError::KeyGeneration(_))
        ));
        assert!(backend.get(KEY_SLOT).unwrap().is_none());
        assert!(!manager.has_key());
    }

    #[test]
    fn malformed_slot_is_not_replaced() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set(KEY_SLOT, b"short").unwrap();
        let manager = KeyManager::new(backend.clone());
        assert!(matches!(manager.ensure_key(), Err(StoreError::InvalidKey(_))));
        assert_eq!(backend.get(KEY_SLOT).unwrap().unwrap(), b"short");
    }

    #[test]
    fn wipe_forces_new_key() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = KeyManager::new(backend.clone());
        manager.ensure_key().unwrap();
        let before = manager.fingerprint();
        manager.wipe().unwrap();
        assert!(!manager.has_key());
        assert_eq!(manager.ensure_key().unwrap(), KeyOrigin::Generated);
        assert_ne!(before, manager.fingerprint());
    }
}
