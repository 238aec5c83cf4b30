//! Application root.
//!
//! [`NestStore`] wires the key manager, both persistence tiers, the passcode
//! gate and the integrity monitor together from a [`StoreConfig`]. Callers
//! construct one and pass it by reference; there is no global instance.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::backend::{FileBackend, KvBackend};
use crate::blob_store::{EncryptionMode, SecureBlobStore};
use crate::collection::{RecordStore, StorageTiers};
use crate::config::StoreConfig;
use crate::crypto::{EntropySource, OsEntropy};
use crate::error::{Result, StoreError};
use crate::integrity::{CorruptionEvent, IntegrityMonitor, IntegrityReport, MonitorHandle};
use crate::key_manager::{KeyManager, KeyOrigin};
use crate::passcode::PasscodeGate;
use crate::paths;
use crate::records::UserPreferences;
use crate::secure_records::{SecureRecords, SECURE_PREFERENCES_KEY};

pub struct NestStore {
    config: StoreConfig,
    data: Arc<dyn KvBackend>,
    keys: Arc<KeyManager>,
    secure: Arc<SecureBlobStore>,
    records: RecordStore,
    passcode: PasscodeGate,
    secure_records: SecureRecords,
    monitor: Arc<IntegrityMonitor>,
}

impl NestStore {
    /// Open the on-disk store under the configured data directory. The key
    /// slot lives in the same directory.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let data: Arc<dyn KvBackend> = Arc::new(Self::file_backend(&config)?);
        Self::open_with(config, data.clone(), data)
    }

    /// Open the on-disk store with the key slot kept in a separate backend,
    /// e.g. the OS keyring.
    pub fn open_with_key_slot(config: StoreConfig, key_slot: Arc<dyn KvBackend>) -> Result<Self> {
        let data: Arc<dyn KvBackend> = Arc::new(Self::file_backend(&config)?);
        Self::open_with(config, data, key_slot)
    }

    pub fn open_with(
        config: StoreConfig,
        data: Arc<dyn KvBackend>,
        key_slot: Arc<dyn KvBackend>,
    ) -> Result<Self> {
        Self::open_with_entropy(config, data, key_slot, Arc::new(OsEntropy))
    }

    pub fn open_with_entropy(
        config: StoreConfig,
        data: Arc<dyn KvBackend>,
        key_slot: Arc<dyn KvBackend>,
        entropy: Arc<dyn EntropySource>,
    ) -> Result<Self> {
        config.validate()?;
        let keys = Arc::new(KeyManager::with_entropy(key_slot, entropy));

        let mut mode = config.encryption;
        if mode == EncryptionMode::Enabled {
            match keys.ensure_key() {
                Ok(KeyOrigin::Generated) => info!("first launch, device key created"),
                Ok(_) => {}
                Err(StoreError::KeyGeneration(reason)) if config.allow_plaintext_fallback => {
                    error!(%reason, "no device key, continuing with encryption disabled");
                    mode = EncryptionMode::Disabled;
                }
                Err(e) => return Err(e),
            }
        }

        let secure = Arc::new(SecureBlobStore::new(data.clone(), keys.clone(), mode));
        let mut records = RecordStore::new(
            StorageTiers::new(data.clone(), secure.clone()),
            config.sensitivity,
        );
        records.load_all()?;

        let monitor = Arc::new(IntegrityMonitor::new(
            secure.clone(),
            config.critical_keys.clone(),
        ));
        info!(?mode, "store opened");

        Ok(Self {
            passcode: PasscodeGate::new(secure.clone()),
            secure_records: SecureRecords::new(secure.clone()),
            config,
            data,
            keys,
            secure,
            records,
            monitor,
        })
    }

    fn file_backend(config: &StoreConfig) -> Result<FileBackend> {
        let dir = paths::store_dir(&config.resolved_data_dir()?);
        FileBackend::open(dir)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn encryption_mode(&self) -> EncryptionMode {
        self.secure.mode()
    }

    pub fn key_manager(&self) -> &KeyManager {
        &self.keys
    }

    pub fn secure(&self) -> &SecureBlobStore {
        &self.secure
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut RecordStore {
        &mut self.records
    }

    pub fn passcode(&self) -> &PasscodeGate {
        &self.passcode
    }

    pub fn secure_records(&self) -> &SecureRecords {
        &self.secure_records
    }

    pub fn monitor(&self) -> &Arc<IntegrityMonitor> {
        &self.monitor
    }

    /// Replace preferences in the plain slot and refresh the secure copy.
    /// If the secure write fails the plain slot is put back.
    pub fn update_preferences(&mut self, prefs: UserPreferences) -> Result<()> {
        let previous = self.records.preferences.get().clone();
        self.records.preferences.replace(prefs.clone())?;
        if let Err(e) = self.secure_records.save_preferences(&prefs) {
            if let Err(restore) = self.records.preferences.replace(previous) {
                error!(error = %restore, "failed to restore preferences after secure write error");
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CorruptionEvent> {
        self.monitor.subscribe()
    }

    pub fn check_integrity(&self) -> IntegrityReport {
        self.monitor.check_once()
    }

    /// Start the periodic integrity loop. Must be called inside a tokio
    /// runtime.
    pub fn start_monitor(&self) -> MonitorHandle {
        self.monitor.start(self.config.integrity_interval())
    }

    /// React to a purge reported by the monitor.
    pub fn handle_corruption(&mut self, event: &CorruptionEvent) -> Result<()> {
        if self.records.handle_corruption(event)? {
            return Ok(());
        }
        if event.key == SECURE_PREFERENCES_KEY {
            info!("secure preferences copy discarded, rewritten on next update");
        } else {
            warn!(key = %event.key, "secure data discarded after integrity failure");
        }
        Ok(())
    }

    /// Device-level reset: every stored entry and the device key are deleted.
    pub fn reset(self) -> Result<()> {
        let keys = self.data.keys()?;
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.data.remove_batch(&refs)?;
        self.keys.wipe()?;
        warn!(entries = keys.len(), "store reset");
        Ok(())
    }
}
