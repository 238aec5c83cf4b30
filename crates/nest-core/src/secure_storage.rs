//! OS credential-store backend, used for the raw device key slot when the
//! platform keychain is available.

use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;
use parking_lot::Mutex;
use std::collections::BTreeSet;

use crate::backend::KvBackend;
use crate::error::{Result, StoreError};

pub const SERVICE_NAME: &str = "NestJournal";

/// Values are base64 encoded since the keychain stores text. The credential
/// store cannot enumerate entries, so `keys()` reports the keys written
/// through this instance.
pub struct KeyringBackend {
    service: String,
    account_prefix: String,
    written: Mutex<BTreeSet<String>>,
}

impl KeyringBackend {
    pub fn new(account_prefix: &str) -> Self {
        Self::with_service(SERVICE_NAME, account_prefix)
    }

    pub fn with_service(service: &str, account_prefix: &str) -> Self {
        Self {
            service: service.to_string(),
            account_prefix: account_prefix.to_string(),
            written: Mutex::new(BTreeSet::new()),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, &format!("{}:{}", self.account_prefix, key))
            .map_err(|e| StoreError::Backend(format!("keyring init: {e}")))
    }
}

impl KvBackend for KeyringBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entry = self.entry(key)?;
        match entry.get_password() {
            Ok(encoded) => Ok(Some(general_purpose::STANDARD.decode(encoded)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Backend(format!("load {key}: {e}"))),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let entry = self.entry(key)?;
        let encoded = general_purpose::STANDARD.encode(value);
        entry
            .set_password(&encoded)
            .map_err(|e| StoreError::Backend(format!("store {key}: {e}")))?;
        self.written.lock().insert(key.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let entry = self.entry(key)?;
        match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                self.written.lock().remove(key);
                Ok(())
            }
            Err(e) => Err(StoreError::Backend(format!("delete {key}: {e}"))),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.written.lock().iter().cloned().collect())
    }
}
