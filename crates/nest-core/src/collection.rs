//! Write-through collection managers.
//!
//! Each collection keeps its records in memory and persists the whole
//! sequence synchronously after every mutation. A failed write rolls the
//! in-memory change back so the cache never runs ahead of storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::KvBackend;
use crate::blob_store::SecureBlobStore;
use crate::error::{Result, StoreError};
use crate::integrity::CorruptionEvent;
use crate::records::{
    JournalEntry, MemoryItem, NurseShiftRecord, ProgressEntry, Record, UserPreferences,
};

pub const PREFERENCES_KEY: &str = "app_preferences";

/// Which persistence tier a collection uses. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Plain JSON in the key/value backend.
    #[default]
    Standard,
    /// Encrypted and checksummed through the secure blob store.
    Protected,
}

/// Handles to both persistence tiers.
#[derive(Clone)]
pub struct StorageTiers {
    plain: Arc<dyn KvBackend>,
    secure: Arc<SecureBlobStore>,
}

impl StorageTiers {
    pub fn new(plain: Arc<dyn KvBackend>, secure: Arc<SecureBlobStore>) -> Self {
        Self { plain, secure }
    }

    pub fn plain(&self) -> &Arc<dyn KvBackend> {
        &self.plain
    }

    pub fn secure(&self) -> &Arc<SecureBlobStore> {
        &self.secure
    }

    fn write(&self, sensitivity: Sensitivity, key: &str, bytes: &[u8]) -> Result<()> {
        match sensitivity {
            Sensitivity::Standard => self.plain.set(key, bytes),
            Sensitivity::Protected => self.secure.store(key, bytes),
        }
    }

    fn read(&self, sensitivity: Sensitivity, key: &str) -> Result<Option<Vec<u8>>> {
        match sensitivity {
            Sensitivity::Standard => self.plain.get(key),
            Sensitivity::Protected => Ok(self.secure.load(key)?.map(|b| b.to_vec())),
        }
    }
}

/// Outcome of decoding a persisted value.
enum Loaded<T> {
    Decoded(T),
    Missing,
    Unusable(String),
}

fn read_decoded<T: serde::de::DeserializeOwned>(
    tiers: &StorageTiers,
    sensitivity: Sensitivity,
    key: &str,
) -> Result<Loaded<T>> {
    let bytes = match tiers.read(sensitivity, key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Ok(Loaded::Missing),
        Err(e @ StoreError::Authentication) | Err(e @ StoreError::IntegrityMismatch { .. }) => {
            return Ok(Loaded::Unusable(e.to_string()))
        }
        Err(e) => return Err(e),
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Loaded::Decoded(value)),
        Err(e) => Ok(Loaded::Unusable(e.to_string())),
    }
}

// ── Collection ──────────────────────────────────────────────────────────────

pub struct Collection<T: Record> {
    sensitivity: Sensitivity,
    tiers: StorageTiers,
    items: Vec<T>,
}

impl<T: Record> Collection<T> {
    pub fn new(tiers: StorageTiers, sensitivity: Sensitivity) -> Self {
        Self {
            sensitivity,
            tiers,
            items: Vec::new(),
        }
    }

    pub fn key(&self) -> &'static str {
        T::COLLECTION
    }

    pub fn sensitivity(&self) -> Sensitivity {
        self.sensitivity
    }

    /// Decode the persisted collection, or seed and persist defaults when it
    /// is missing or unreadable.
    pub fn load_all(&mut self) -> Result<&[T]> {
        match read_decoded::<Vec<T>>(&self.tiers, self.sensitivity, T::COLLECTION)? {
            Loaded::Decoded(items) => {
                let stored = items.len();
                self.items = dedupe(items, T::COLLECTION);
                if self.items.len() != stored {
                    self.persist()?;
                }
                debug!(collection = T::COLLECTION, count = self.items.len(), "collection loaded");
            }
            Loaded::Missing => {
                self.items = T::seed();
                self.persist()?;
                info!(collection = T::COLLECTION, count = self.items.len(), "collection seeded");
            }
            Loaded::Unusable(reason) => {
                warn!(collection = T::COLLECTION, %reason, "stored collection unreadable, reseeding");
                self.items = T::seed();
                self.persist()?;
            }
        }
        Ok(&self.items)
    }

    /// Discard the in-memory state and decode again from storage.
    pub fn reload(&mut self) -> Result<&[T]> {
        self.items.clear();
        self.load_all()
    }

    pub fn records(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&T> {
        self.items.iter().find(|r| r.id() == id)
    }

    pub fn filter<P>(&self, mut predicate: P) -> Vec<&T>
    where
        P: FnMut(&T) -> bool,
    {
        self.items.iter().filter(|r| predicate(*r)).collect()
    }

    /// Records whose timestamp falls in `[from, to]`.
    pub fn between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<&T> {
        self.filter(|r| {
            let ts = r.timestamp();
            ts >= from && ts <= to
        })
    }

    /// Append a record. A nil id is replaced with a fresh one; an id already
    /// present is rejected.
    pub fn add(&mut self, mut record: T) -> Result<Uuid> {
        if record.id().is_nil() {
            record.set_id(Uuid::new_v4());
        }
        let id = record.id();
        if self.get(id).is_some() {
            return Err(StoreError::DuplicateId(id.to_string()));
        }
        self.items.push(record);
        if let Err(e) = self.persist() {
            self.items.pop();
            return Err(e);
        }
        debug!(collection = T::COLLECTION, %id, "record added");
        Ok(id)
    }

    /// Replace the record with the same id, keeping its position.
    pub fn update(&mut self, record: T) -> Result<()> {
        let id = record.id();
        let index = self
            .items
            .iter()
            .position(|r| r.id() == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let previous = std::mem::replace(&mut self.items[index], record);
        if let Err(e) = self.persist() {
            self.items[index] = previous;
            return Err(e);
        }
        debug!(collection = T::COLLECTION, %id, "record updated");
        Ok(())
    }

    /// Remove the record with `id`. Returns `false` when nothing matched.
    pub fn delete(&mut self, id: Uuid) -> Result<bool> {
        let Some(index) = self.items.iter().position(|r| r.id() == id) else {
            return Ok(false);
        };
        let removed = self.items.remove(index);
        if let Err(e) = self.persist() {
            self.items.insert(index, removed);
            return Err(e);
        }
        debug!(collection = T::COLLECTION, %id, "record deleted");
        Ok(true)
    }

    fn persist(&self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.items)?;
        self.tiers.write(self.sensitivity, T::COLLECTION, &bytes)
    }
}

fn dedupe<T: Record>(items: Vec<T>, collection: &str) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    let before = items.len();
    let kept: Vec<T> = items.into_iter().filter(|r| seen.insert(r.id())).collect();
    if kept.len() != before {
        warn!(collection, dropped = before - kept.len(), "duplicate ids dropped on load");
    }
    kept
}

// ── Preferences ─────────────────────────────────────────────────────────────

/// Single preferences document, replaced wholesale.
pub struct PreferencesSlot {
    sensitivity: Sensitivity,
    tiers: StorageTiers,
    current: UserPreferences,
}

impl PreferencesSlot {
    pub fn new(tiers: StorageTiers, sensitivity: Sensitivity) -> Self {
        Self {
            sensitivity,
            tiers,
            current: UserPreferences::default(),
        }
    }

    pub fn key(&self) -> &'static str {
        PREFERENCES_KEY
    }

    pub fn load(&mut self) -> Result<&UserPreferences> {
        match read_decoded::<UserPreferences>(&self.tiers, self.sensitivity, PREFERENCES_KEY)? {
            Loaded::Decoded(prefs) => self.current = prefs,
            Loaded::Missing => {
                self.current = UserPreferences::default();
                self.persist(&self.current)?;
            }
            Loaded::Unusable(reason) => {
                warn!(%reason, "stored preferences unreadable, using defaults");
                self.current = UserPreferences::default();
                self.persist(&self.current)?;
            }
        }
        Ok(&self.current)
    }

    pub fn get(&self) -> &UserPreferences {
        &self.current
    }

    pub fn replace(&mut self, prefs: UserPreferences) -> Result<()> {
        self.persist(&prefs)?;
        self.current = prefs;
        Ok(())
    }

    fn persist(&self, prefs: &UserPreferences) -> Result<()> {
        let bytes = serde_json::to_vec(prefs)?;
        self.tiers.write(self.sensitivity, PREFERENCES_KEY, &bytes)
    }
}

// ── Record store ────────────────────────────────────────────────────────────

/// Per-collection tier assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct CollectionSensitivity {
    pub journal: Sensitivity,
    pub progress: Sensitivity,
    pub memories: Sensitivity,
    pub nurse_shifts: Sensitivity,
    pub preferences: Sensitivity,
}

pub struct RecordStore {
    pub journal: Collection<JournalEntry>,
    pub progress: Collection<ProgressEntry>,
    pub memories: Collection<MemoryItem>,
    pub nurse_shifts: Collection<NurseShiftRecord>,
    pub preferences: PreferencesSlot,
}

impl RecordStore {
    pub fn new(tiers: StorageTiers, sensitivity: CollectionSensitivity) -> Self {
        Self {
            journal: Collection::new(tiers.clone(), sensitivity.journal),
            progress: Collection::new(tiers.clone(), sensitivity.progress),
            memories: Collection::new(tiers.clone(), sensitivity.memories),
            nurse_shifts: Collection::new(tiers.clone(), sensitivity.nurse_shifts),
            preferences: PreferencesSlot::new(tiers, sensitivity.preferences),
        }
    }

    pub fn load_all(&mut self) -> Result<()> {
        self.journal.load_all()?;
        self.progress.load_all()?;
        self.memories.load_all()?;
        self.nurse_shifts.load_all()?;
        self.preferences.load()?;
        Ok(())
    }

    /// Reload whichever collection lives under the corrupted key. Returns
    /// `true` if one did.
    pub fn handle_corruption(&mut self, event: &CorruptionEvent) -> Result<bool> {
        let key = event.key.as_str();
        if key == self.journal.key() {
            self.journal.load_all()?;
        } else if key == self.progress.key() {
            self.progress.load_all()?;
        } else if key == self.memories.key() {
            self.memories.load_all()?;
        } else if key == self.nurse_shifts.key() {
            self.nurse_shifts.load_all()?;
        } else if key == self.preferences.key() {
            self.preferences.load()?;
        } else {
            return Ok(false);
        }
        info!(key, "collection reloaded after corruption");
        Ok(true)
    }
}
