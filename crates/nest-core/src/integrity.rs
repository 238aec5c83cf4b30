//! Periodic integrity checks over critical secure blobs.
//!
//! Each cycle re-derives the checksum of every critical key and compares it
//! with the stored one. A mismatch deletes both entries and broadcasts a
//! [`CorruptionEvent`]; nothing is repaired. Anyone able to rewrite a blob and
//! its checksum together goes unnoticed, so this is a detector for accidental
//! corruption and casual tampering only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::blob_store::{MismatchReason, PairCheck, SecureBlobStore};

pub const CORRUPTION_EVENT: &str = "dataCorruptionDetected";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_CRITICAL_KEYS: &[&str] = &["baby_data", "user_preferences", "security_settings"];

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptionEvent {
    pub name: &'static str,
    pub key: String,
}

impl CorruptionEvent {
    fn new(key: &str) -> Self {
        Self {
            name: CORRUPTION_EVENT,
            key: key.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Intact,
    Absent,
    Purged(MismatchReason),
    /// The key could not be checked this cycle: backend error, no key, or
    /// the entry was rewritten while it was being checked.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub checked_at: DateTime<Utc>,
    pub results: Vec<(String, KeyStatus)>,
}

impl IntegrityReport {
    pub fn status(&self, key: &str) -> Option<KeyStatus> {
        self.results
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, status)| *status)
    }

    pub fn purged(&self) -> impl Iterator<Item = &str> {
        self.results.iter().filter_map(|(k, s)| match s {
            KeyStatus::Purged(_) => Some(k.as_str()),
            _ => None,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.purged().next().is_none()
    }
}

pub struct IntegrityMonitor {
    secure: Arc<SecureBlobStore>,
    critical_keys: Vec<String>,
    events: broadcast::Sender<CorruptionEvent>,
}

impl IntegrityMonitor {
    pub fn new(secure: Arc<SecureBlobStore>, critical_keys: Vec<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            secure,
            critical_keys,
            events,
        }
    }

    pub fn with_default_keys(secure: Arc<SecureBlobStore>) -> Self {
        Self::new(
            secure,
            DEFAULT_CRITICAL_KEYS.iter().map(|k| k.to_string()).collect(),
        )
    }

    pub fn critical_keys(&self) -> &[String] {
        &self.critical_keys
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CorruptionEvent> {
        self.events.subscribe()
    }

    /// Run one synchronous check cycle.
    pub fn check_once(&self) -> IntegrityReport {
        let mut results = Vec::with_capacity(self.critical_keys.len());
        for key in &self.critical_keys {
            let status = match self.check_key(key) {
                Ok(status) => status,
                Err(e) => {
                    warn!(key = %key, error = %e, "integrity check skipped");
                    KeyStatus::Skipped
                }
            };
            results.push((key.clone(), status));
        }
        debug!(keys = results.len(), "integrity cycle complete");
        IntegrityReport {
            checked_at: Utc::now(),
            results,
        }
    }

    fn check_key(&self, key: &str) -> crate::error::Result<KeyStatus> {
        let (blob, checksum) = self.secure.read_pair(key)?;
        let reason = match self.secure.classify(blob.as_deref(), checksum.as_deref())? {
            PairCheck::Intact => return Ok(KeyStatus::Intact),
            PairCheck::Absent => return Ok(KeyStatus::Absent),
            PairCheck::Mismatch(reason) => reason,
        };
        warn!(key, ?reason, "integrity mismatch, discarding blob and checksum");
        // Only the pair that was checked is removed; a newer write wins.
        if !self
            .secure
            .remove_if_unchanged(key, blob.as_deref(), checksum.as_deref())?
        {
            info!(key, "entry rewritten during check, left in place");
            return Ok(KeyStatus::Skipped);
        }
        // No subscribers is fine.
        let _ = self.events.send(CorruptionEvent::new(key));
        Ok(KeyStatus::Purged(reason))
    }

    /// Spawn the periodic loop on the current tokio runtime.
    pub fn start(self: &Arc<Self>, interval: Duration) -> MonitorHandle {
        let wake = Arc::new(Notify::new());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let monitor = Arc::clone(self);
        let wake_task = wake.clone();

        let join = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "integrity monitor started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = wake_task.notified() => {
                        debug!("integrity monitor woken early");
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
                if *shutdown_rx.borrow() {
                    break;
                }
                let report = monitor.check_once();
                if !report.is_clean() {
                    info!(purged = report.purged().count(), "integrity monitor purged corrupted data");
                }
            }
            info!("integrity monitor stopped");
        });

        MonitorHandle {
            wake,
            shutdown_tx,
            join,
        }
    }
}

/// Control handle for a running monitor. Dropping it also ends the loop.
pub struct MonitorHandle {
    wake: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Run a cycle now instead of waiting for the timer.
    pub fn check_now(&self) {
        self.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "integrity monitor task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{KvBackend, MemoryBackend};
    use crate::blob_store::EncryptionMode;
    use crate::key_manager::KeyManager;

    fn fixture() -> (Arc<MemoryBackend>, Arc<SecureBlobStore>) {
        let backend = Arc::new(MemoryBackend::new());
        let keys = Arc::new(KeyManager::new(backend.clone()));
        keys.ensure_key().unwrap();
        let secure = Arc::new(SecureBlobStore::new(
            backend.clone(),
            keys,
            EncryptionMode::Enabled,
        ));
        (backend, secure)
    }

    fn corrupt(backend: &MemoryBackend, key: &str) {
        let mut raw = backend.get(key).unwrap().unwrap();
        raw[30] ^= 0xff;
        backend.set(key, &raw).unwrap();
    }

    #[test]
    fn intact_and_absent_keys() {
        let (_, secure) = fixture();
        secure.store("baby_data", b"{}").unwrap();
        let monitor = IntegrityMonitor::with_default_keys(secure);
        let report = monitor.check_once();
        assert_eq!(report.status("baby_data"), Some(KeyStatus::Intact));
        assert_eq!(report.status("user_preferences"), Some(KeyStatus::Absent));
        assert!(report.is_clean());
    }

    #[test]
    fn corrupted_blob_is_purged_with_one_event() {
        let (backend, secure) = fixture();
        secure.store("security_settings", b"{\"autoLockMinutes\":5}").unwrap();
        secure.store("baby_data", b"{}").unwrap();
        corrupt(&backend, "security_settings");

        let monitor = IntegrityMonitor::with_default_keys(secure);
        let mut rx = monitor.subscribe();
        let report = monitor.check_once();

        assert!(matches!(
            report.status("security_settings"),
            Some(KeyStatus::Purged(_))
        ));
        assert!(backend.get("security_settings").unwrap().is_none());
        assert!(backend.get("security_settings_checksum").unwrap().is_none());
        assert!(backend.get("baby_data").unwrap().is_some());

        let event = rx.try_recv().unwrap();
        assert_eq!(event.key, "security_settings");
        assert_eq!(event.name, CORRUPTION_EVENT);
        assert!(rx.try_recv().is_err());

        // Second cycle finds nothing left to purge.
        assert_eq!(
            monitor.check_once().status("security_settings"),
            Some(KeyStatus::Absent)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn missing_key_skips_instead_of_purging() {
        let backend = Arc::new(MemoryBackend::new());
        let writer_keys = Arc::new(KeyManager::new(backend.clone()));
        writer_keys.ensure_key().unwrap();
        SecureBlobStore::new(backend.clone(), writer_keys, EncryptionMode::Enabled)
            .store("baby_data", b"{}")
            .unwrap();

        let locked = Arc::new(KeyManager::new(backend.clone()));
        let secure = Arc::new(SecureBlobStore::new(
            backend.clone(),
            locked,
            EncryptionMode::Enabled,
        ));
        let monitor = IntegrityMonitor::with_default_keys(secure);
        assert_eq!(
            monitor.check_once().status("baby_data"),
            Some(KeyStatus::Skipped)
        );
        assert!(backend.get("baby_data").unwrap().is_some());
    }

    /// Runs a writer just before the first conditional removal, as a
    /// concurrent save would.
    struct InterleavingBackend {
        inner: Arc<MemoryBackend>,
        before_remove: parking_lot::Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl InterleavingBackend {
        fn run_hook(&self) {
            if let Some(hook) = self.before_remove.lock().take() {
                hook();
            }
        }
    }

    impl KvBackend for InterleavingBackend {
        fn get(&self, key: &str) -> crate::error::Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &[u8]) -> crate::error::Result<()> {
            self.inner.set(key, value)
        }
        fn remove(&self, key: &str) -> crate::error::Result<()> {
            self.inner.remove(key)
        }
        fn keys(&self) -> crate::error::Result<Vec<String>> {
            self.inner.keys()
        }
        fn get_batch(&self, keys: &[&str]) -> crate::error::Result<Vec<Option<Vec<u8>>>> {
            self.inner.get_batch(keys)
        }
        fn set_batch(&self, entries: &[(&str, &[u8])]) -> crate::error::Result<()> {
            self.inner.set_batch(entries)
        }
        fn remove_batch(&self, keys: &[&str]) -> crate::error::Result<()> {
            self.run_hook();
            self.inner.remove_batch(keys)
        }
        fn remove_batch_if_unchanged(
            &self,
            expected: &[(&str, Option<&[u8]>)],
        ) -> crate::error::Result<bool> {
            self.run_hook();
            self.inner.remove_batch_if_unchanged(expected)
        }
    }

    #[test]
    fn rewrite_between_check_and_purge_is_kept() {
        let inner = Arc::new(MemoryBackend::new());
        let keys = Arc::new(KeyManager::new(inner.clone()));
        keys.ensure_key().unwrap();
        let writer = SecureBlobStore::new(inner.clone(), keys.clone(), EncryptionMode::Enabled);
        writer.store("baby_data", b"{\"v\":1}").unwrap();
        corrupt(&inner, "baby_data");

        let racing = Arc::new(InterleavingBackend {
            inner: inner.clone(),
            before_remove: parking_lot::Mutex::new(Some(Box::new(move || {
                writer.store("baby_data", b"{\"v\":2}").unwrap();
            }))),
        });
        let secure = Arc::new(SecureBlobStore::new(racing, keys, EncryptionMode::Enabled));
        let monitor = IntegrityMonitor::with_default_keys(secure.clone());
        let mut rx = monitor.subscribe();

        let report = monitor.check_once();
        assert_eq!(report.status("baby_data"), Some(KeyStatus::Skipped));
        assert!(rx.try_recv().is_err());
        assert_eq!(
            secure.load("baby_data").unwrap().unwrap().as_slice(),
            b"{\"v\":2}"
        );
        assert_eq!(monitor.check_once().status("baby_data"), Some(KeyStatus::Intact));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_detects_corruption_and_stops() {
        let (backend, secure) = fixture();
        secure.store("user_preferences", b"{}").unwrap();
        corrupt(&backend, "user_preferences");

        let monitor = Arc::new(IntegrityMonitor::with_default_keys(secure));
        let mut rx = monitor.subscribe();
        let handle = monitor.start(DEFAULT_INTERVAL);
        assert!(handle.is_running());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "user_preferences");
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn check_now_runs_a_cycle() {
        let (backend, secure) = fixture();
        let monitor = Arc::new(IntegrityMonitor::with_default_keys(secure.clone()));
        let mut rx = monitor.subscribe();
        let handle = monitor.start(Duration::from_secs(3600));

        secure.store("baby_data", b"{}").unwrap();
        corrupt(&backend, "baby_data");
        handle.check_now();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "baby_data");
        handle.stop().await;
    }
}
