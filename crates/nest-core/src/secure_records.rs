//! Typed documents kept only in the secure tier.
//!
//! These are the keys the integrity monitor watches by default. A purged or
//! unreadable document reads back as absent (profile) or as its default
//! (settings and preferences).

use std::sync::Arc;
use tracing::{info, warn};

use crate::blob_store::SecureBlobStore;
use crate::error::{Result, StoreError};
use crate::records::{BabyProfile, SecuritySettings, UserPreferences};

pub const BABY_PROFILE_KEY: &str = "baby_data";
pub const SECURE_PREFERENCES_KEY: &str = "user_preferences";
pub const SECURITY_SETTINGS_KEY: &str = "security_settings";

pub struct SecureRecords {
    secure: Arc<SecureBlobStore>,
}

impl SecureRecords {
    pub fn new(secure: Arc<SecureBlobStore>) -> Self {
        Self { secure }
    }

    pub fn save_baby_profile(&self, profile: &BabyProfile) -> Result<()> {
        self.secure.store_value(BABY_PROFILE_KEY, profile)?;
        info!("baby profile saved");
        Ok(())
    }

    pub fn baby_profile(&self) -> Result<Option<BabyProfile>> {
        self.load_or_discard(BABY_PROFILE_KEY)
    }

    pub fn clear_baby_profile(&self) -> Result<()> {
        self.secure.remove(BABY_PROFILE_KEY)
    }

    pub fn save_preferences(&self, prefs: &UserPreferences) -> Result<()> {
        self.secure.store_value(SECURE_PREFERENCES_KEY, prefs)
    }

    pub fn preferences(&self) -> Result<Option<UserPreferences>> {
        self.load_or_discard(SECURE_PREFERENCES_KEY)
    }

    pub fn save_security_settings(&self, settings: &SecuritySettings) -> Result<()> {
        self.secure.store_value(SECURITY_SETTINGS_KEY, settings)
    }

    pub fn security_settings(&self) -> Result<SecuritySettings> {
        Ok(self
            .load_or_discard(SECURITY_SETTINGS_KEY)?
            .unwrap_or_default())
    }

    /// Free-form secure field outside the typed documents.
    pub fn put_field(&self, key: &str, value: &str) -> Result<()> {
        self.secure.store_string(key, value)
    }

    pub fn field(&self, key: &str) -> Result<Option<String>> {
        match self.secure.load_string(key) {
            Err(StoreError::Authentication) | Err(StoreError::IntegrityMismatch { .. }) => {
                warn!(key, "secure field unreadable");
                Ok(None)
            }
            other => other,
        }
    }

    pub fn remove_field(&self, key: &str) -> Result<()> {
        self.secure.remove(key)
    }

    // A document that decrypts but no longer parses is dropped so the next
    // save starts clean.
    fn load_or_discard<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.secure.load_value(key) {
            Err(StoreError::Decode { reason, .. }) => {
                warn!(key, %reason, "secure document malformed, discarding");
                self.secure.remove(key)?;
                Ok(None)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{KvBackend, MemoryBackend};
    use crate::blob_store::EncryptionMode;
    use crate::key_manager::KeyManager;
    use chrono::NaiveDate;

    fn records() -> (Arc<MemoryBackend>, SecureRecords) {
        let backend = Arc::new(MemoryBackend::new());
        let keys = Arc::new(KeyManager::new(backend.clone()));
        keys.ensure_key().unwrap();
        let secure = Arc::new(SecureBlobStore::new(
            backend.clone(),
            keys,
            EncryptionMode::Enabled,
        ));
        (backend, SecureRecords::new(secure))
    }

    fn profile() -> BabyProfile {
        BabyProfile {
            name: "Ava".into(),
            birth_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2026, 5, 11),
            gestational_age_weeks: Some(29),
            birth_weight_grams: Some(1250.0),
            hospital: None,
        }
    }

    #[test]
    fn baby_profile_round_trips_encrypted() {
        let (backend, records) = records();
        assert!(records.baby_profile().unwrap().is_none());
        records.save_baby_profile(&profile()).unwrap();
        assert_eq!(records.baby_profile().unwrap(), Some(profile()));
        let raw = backend.get(BABY_PROFILE_KEY).unwrap().unwrap();
        assert!(!raw.windows(3).any(|w| w == b"Ava"));
        assert!(backend.get("baby_data_checksum").unwrap().is_some());
    }

    #[test]
    fn settings_default_when_missing_or_tampered() {
        let (backend, records) = records();
        assert_eq!(records.security_settings().unwrap(), SecuritySettings::default());

        let custom = SecuritySettings {
            biometric_unlock: true,
            auto_lock_minutes: 1,
            hide_in_app_switcher: false,
        };
        records.save_security_settings(&custom).unwrap();
        assert_eq!(records.security_settings().unwrap(), custom);

        let mut raw = backend.get(SECURITY_SETTINGS_KEY).unwrap().unwrap();
        raw[24] ^= 0x80;
        backend.set(SECURITY_SETTINGS_KEY, &raw).unwrap();
        assert_eq!(records.security_settings().unwrap(), SecuritySettings::default());
    }

    #[test]
    fn malformed_document_is_discarded() {
        let (backend, records) = records();
        records.put_field(SECURE_PREFERENCES_KEY, "[1,2,3]").unwrap();
        assert!(records.preferences().unwrap().is_none());
        assert!(backend.get(SECURE_PREFERENCES_KEY).unwrap().is_none());
    }

    #[test]
    fn free_form_fields() {
        let (_, records) = records();
        records.put_field("nicu_room", "4B").unwrap();
        assert_eq!(records.field("nicu_room").unwrap().as_deref(), Some("4B"));
        records.remove_field("nicu_room").unwrap();
        assert!(records.field("nicu_room").unwrap().is_none());
    }
}
