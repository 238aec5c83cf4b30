use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

pub const APP_QUALIFIER: &str = "org";
pub const APP_ORG: &str = "nest";
pub const APP_NAME: &str = "journal";

pub const CONFIG_FILE: &str = "config.json";

pub fn data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| StoreError::Config("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Directory holding one file per stored key.
pub fn store_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("store")
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}
