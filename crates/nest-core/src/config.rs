//! Store configuration.
//!
//! Resolved from built-in defaults, then an optional JSON file, then
//! environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::blob_store::EncryptionMode;
use crate::collection::CollectionSensitivity;
use crate::error::{Result, StoreError};
use crate::integrity::{DEFAULT_CRITICAL_KEYS, DEFAULT_INTERVAL};
use crate::paths;

pub const DATA_DIR_ENV: &str = "NEST_DATA_DIR";
pub const INTERVAL_ENV: &str = "NEST_INTEGRITY_INTERVAL_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Falls back to the platform data directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub encryption: EncryptionMode,
    /// Continue unencrypted when no device key can be generated.
    pub allow_plaintext_fallback: bool,
    pub integrity_interval_secs: u64,
    pub critical_keys: Vec<String>,
    pub app_version: String,
    pub sensitivity: CollectionSensitivity,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            encryption: EncryptionMode::Enabled,
            allow_plaintext_fallback: false,
            integrity_interval_secs: DEFAULT_INTERVAL.as_secs(),
            critical_keys: DEFAULT_CRITICAL_KEYS.iter().map(|k| k.to_string()).collect(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            sensitivity: CollectionSensitivity::default(),
        }
    }
}

impl StoreConfig {
    /// Resolve the effective configuration.
    ///
    /// An explicit `config_file` must exist. Without one, `config.json` in the
    /// data directory is read if present.
    pub fn load(config_file: Option<&Path>, data_dir: Option<PathBuf>) -> Result<Self> {
        let implicit_dir = match &data_dir {
            Some(dir) => dir.clone(),
            None => match std::env::var(DATA_DIR_ENV) {
                Ok(dir) => PathBuf::from(dir),
                Err(_) => paths::data_dir()?,
            },
        };

        let mut config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = paths::config_path(&implicit_dir);
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        if data_dir.is_some() {
            config.data_dir = data_dir;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let config = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "configuration file loaded");
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(DATA_DIR_ENV) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup(INTERVAL_ENV) {
            self.integrity_interval_secs = raw
                .trim()
                .parse()
                .map_err(|_| StoreError::Config(format!("{INTERVAL_ENV} is not a number: {raw}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.integrity_interval_secs == 0 {
            return Err(StoreError::Config(
                "integrity interval must be at least one second".into(),
            ));
        }
        Ok(())
    }

    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => paths::data_dir(),
        }
    }

    pub fn integrity_interval(&self) -> Duration {
        Duration::from_secs(self.integrity_interval_secs)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Sensitivity;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.encryption, EncryptionMode::Enabled);
        assert_eq!(config.integrity_interval(), Duration::from_secs(300));
        assert_eq!(
            config.critical_keys,
            vec!["baby_data", "user_preferences", "security_settings"]
        );
        assert_eq!(config.sensitivity.journal, Sensitivity::Standard);
        assert!(!config.allow_plaintext_fallback);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"integrityIntervalSecs": 60, "sensitivity": {"journal": "protected"}}"#,
        )
        .unwrap();
        let config = StoreConfig::from_file(&path).unwrap();
        assert_eq!(config.integrity_interval_secs, 60);
        assert_eq!(config.sensitivity.journal, Sensitivity::Protected);
        assert_eq!(config.sensitivity.progress, Sensitivity::Standard);
        assert_eq!(config.encryption, EncryptionMode::Enabled);
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> =
            [(INTERVAL_ENV, "15"), (DATA_DIR_ENV, "/tmp/nest-env")].into();
        let mut config = StoreConfig {
            integrity_interval_secs: 60,
            ..StoreConfig::default()
        };
        config
            .apply_env(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.integrity_interval_secs, 15);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/nest-env")));
    }

    #[test]
    fn bad_interval_is_rejected() {
        let mut config = StoreConfig::default();
        let err = config
            .apply_env(|name| (name == INTERVAL_ENV).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));

        config.integrity_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = StoreConfig {
            encryption: EncryptionMode::Disabled,
            app_version: "2.1.0".into(),
            ..StoreConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(StoreConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn load_reads_config_from_data_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"appVersion": "9.9.9"}"#,
        )
        .unwrap();
        let config = StoreConfig::load(None, Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(config.app_version, "9.9.9");
        assert_eq!(config.resolved_data_dir().unwrap(), dir.path());
    }
}
