//! Physical key/value backends.
//!
//! Everything above this layer addresses data by string key. Batch operations
//! are atomic with respect to other calls on the same backend instance, which
//! is what lets a blob and its checksum be written and read as one unit.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// All keys currently stored, in no particular order.
    fn keys(&self) -> Result<Vec<String>>;

    fn get_batch(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    fn set_batch(&self, entries: &[(&str, &[u8])]) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    fn remove_batch(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }

    /// Remove every key in `expected` only if each one still holds the
    /// given value (`None` meaning absent). Returns `false` and removes
    /// nothing when any value differs.
    ///
    /// The default is not atomic; backends with a lock override it.
    fn remove_batch_if_unchanged(&self, expected: &[(&str, Option<&[u8]>)]) -> Result<bool> {
        let keys: Vec<&str> = expected.iter().map(|(k, _)| *k).collect();
        let current = self.get_batch(&keys)?;
        if !unchanged(expected, &current) {
            return Ok(false);
        }
        self.remove_batch(&keys)?;
        Ok(true)
    }
}

fn unchanged(expected: &[(&str, Option<&[u8]>)], current: &[Option<Vec<u8>>]) -> bool {
    expected.len() == current.len()
        && expected
            .iter()
            .zip(current)
            .all(|((_, want), have)| *want == have.as_deref())
}

// ── In-memory ───────────────────────────────────────────────────────────────

/// Volatile backend. Batches run under a single lock.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.map.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.map.read().keys().cloned().collect())
    }

    fn get_batch(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        let guard = self.map.read();
        Ok(keys.iter().map(|k| guard.get(*k).cloned()).collect())
    }

    fn set_batch(&self, entries: &[(&str, &[u8])]) -> Result<()> {
        let mut guard = self.map.write();
        for (key, value) in entries {
            guard.insert(key.to_string(), value.to_vec());
        }
        Ok(())
    }

    fn remove_batch(&self, keys: &[&str]) -> Result<()> {
        let mut guard = self.map.write();
        for key in keys {
            guard.remove(*key);
        }
        Ok(())
    }

    fn remove_batch_if_unchanged(&self, expected: &[(&str, Option<&[u8]>)]) -> Result<bool> {
        let mut guard = self.map.write();
        let current: Vec<Option<Vec<u8>>> =
            expected.iter().map(|(k, _)| guard.get(*k).cloned()).collect();
        if !unchanged(expected, &current) {
            return Ok(false);
        }
        for (key, _) in expected {
            guard.remove(*key);
        }
        Ok(true)
    }
}

// ── Directory of files ──────────────────────────────────────────────────────

const ENTRY_SUFFIX: &str = ".entry";
const STAGING_SUFFIX: &str = ".staging";

/// Durable backend storing one file per key. File names are the hex encoding
/// of the key so arbitrary key strings are safe on every platform. Writes go
/// through a staging file and a rename.
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    staging_root: PathBuf,
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let staging_root = root.join("staging");
        fs::create_dir_all(&staging_root)?;
        Self::restrict_dir_permissions(&root);
        Self::cleanup_staging_dir(&staging_root);
        Ok(Self {
            root,
            staging_root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}{}", hex::encode(key.as_bytes()), ENTRY_SUFFIX))
    }

    fn read_entry(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.entry_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_entry(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let staging_path = self
            .staging_root
            .join(format!("{}{}", Uuid::new_v4(), STAGING_SUFFIX));
        {
            let mut file = File::create(&staging_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&staging_path, self.entry_path(key))?;
        Self::fsync_dir(&self.root)?;
        Ok(())
    }

    fn remove_entry(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn restrict_dir_permissions(path: &Path) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
                warn!("cannot restrict permissions on {}: {}", path.display(), e);
            }
        }
    }

    /// Remove leftover staging files from an interrupted write.
    fn cleanup_staging_dir(staging_root: &Path) {
        if let Ok(entries) = fs::read_dir(staging_root) {
            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy().ends_with(STAGING_SUFFIX) {
                    warn!(path = %entry.path().display(), "removing orphaned staging file");
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
    }

    fn fsync_dir(path: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            let dir = OpenOptions::new().read(true).open(path)?;
            dir.sync_all()?;
        }
        #[cfg(not(unix))]
        let _ = path;
        Ok(())
    }
}

impl KvBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.lock.lock();
        self.read_entry(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let _guard = self.lock.lock();
        self.write_entry(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock();
        self.remove_entry(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock();
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(ENTRY_SUFFIX) else {
                continue;
            };
            match hex::decode(stem).map(String::from_utf8) {
                Ok(Ok(key)) => keys.push(key),
                _ => warn!(file = %name, "skipping unrecognised entry file"),
            }
        }
        Ok(keys)
    }

    fn get_batch(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        let _guard = self.lock.lock();
        keys.iter().map(|k| self.read_entry(k)).collect()
    }

    fn set_batch(&self, entries: &[(&str, &[u8])]) -> Result<()> {
        let _guard = self.lock.lock();
        for (key, value) in entries {
            self.write_entry(key, value)?;
        }
        Ok(())
    }

    fn remove_batch(&self, keys: &[&str]) -> Result<()> {
        let _guard = self.lock.lock();
        for key in keys {
            self.remove_entry(key)?;
        }
        Ok(())
    }

    fn remove_batch_if_unchanged(&self, expected: &[(&str, Option<&[u8]>)]) -> Result<bool> {
        let _guard = self.lock.lock();
        let current = expected
            .iter()
            .map(|(k, _)| self.read_entry(k))
            .collect::<Result<Vec<_>>>()?;
        if !unchanged(expected, &current) {
            return Ok(false);
        }
        for (key, _) in expected {
            self.remove_entry(key)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_backend_roundtrip_and_keys() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        backend.set("journal_entries", b"[]").unwrap();
        backend.set("weird/key name", b"x").unwrap();
        assert_eq!(backend.get("journal_entries").unwrap().unwrap(), b"[]");
        let mut keys = backend.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["journal_entries", "weird/key name"]);
        backend.remove("journal_entries").unwrap();
        assert!(backend.get("journal_entries").unwrap().is_none());
        // removing twice is fine
        backend.remove("journal_entries").unwrap();
    }

    #[test]
    fn file_backend_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend
                .set_batch(&[("a", b"1".as_slice()), ("a_checksum", b"2".as_slice())])
                .unwrap();
        }
        let backend = FileBackend::open(dir.path()).unwrap();
        let values = backend.get_batch(&["a", "a_checksum", "b"]).unwrap();
        assert_eq!(values[0].as_deref(), Some(b"1".as_slice()));
        assert_eq!(values[1].as_deref(), Some(b"2".as_slice()));
        assert!(values[2].is_none());
    }

    #[test]
    fn orphaned_staging_files_are_cleaned() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("staging");
        fs::create_dir_all(&staging).unwrap();
        let orphan = staging.join("dead.staging");
        fs::write(&orphan, b"partial").unwrap();
        let _backend = FileBackend::open(dir.path()).unwrap();
        assert!(!orphan.exists());
    }

    #[test]
    fn memory_backend_batches() {
        let backend = MemoryBackend::new();
        backend
            .set_batch(&[("x", b"1".as_slice()), ("y", b"2".as_slice())])
            .unwrap();
        assert_eq!(backend.len(), 2);
        backend.remove_batch(&["x", "y"]).unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn conditional_remove_respects_current_values() {
        let dir = tempdir().unwrap();
        let file = FileBackend::open(dir.path()).unwrap();
        let memory = MemoryBackend::new();
        let backends: [&dyn KvBackend; 2] = [&file, &memory];
        for backend in backends {
            backend
                .set_batch(&[("k", b"old".as_slice()), ("k_checksum", b"c1".as_slice())])
                .unwrap();
            backend.set("k", b"new").unwrap();
            let stale = [("k", Some(b"old".as_slice())), ("k_checksum", Some(b"c1".as_slice()))];
            assert!(!backend.remove_batch_if_unchanged(&stale).unwrap());
            assert_eq!(backend.get("k").unwrap().as_deref(), Some(b"new".as_slice()));
            assert!(backend.get("k_checksum").unwrap().is_some());

            let current = [("k", Some(b"new".as_slice())), ("k_checksum", Some(b"c1".as_slice()))];
            assert!(backend.remove_batch_if_unchanged(&current).unwrap());
            assert!(backend.get("k").unwrap().is_none());
            assert!(backend.get("k_checksum").unwrap().is_none());

            // An expected-absent entry that has since appeared blocks removal.
            backend.set("half", b"blob").unwrap();
            backend.set("half_checksum", b"c").unwrap();
            let expected = [("half", Some(b"blob".as_slice())), ("half_checksum", None)];
            assert!(!backend.remove_batch_if_unchanged(&expected).unwrap());
            assert!(backend.get("half").unwrap().is_some());
        }
    }
}
