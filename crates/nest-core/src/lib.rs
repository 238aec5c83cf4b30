//! nest-core: encrypted local record store for the Nest NICU journal
//!
//! # Storage tiers
//! - Plain tier: JSON documents in a key/value backend, used for collections
//!   tagged `Sensitivity::Standard`.
//! - Secure tier: XChaCha20-Poly1305 blobs plus a SHA-256 checksum of the
//!   plaintext under `<key>_checksum`, written together in one batch.
//!
//! The device key is generated once, kept in a raw slot (file or OS keyring)
//! and only ever borrowed through `KeyManager::with_key`.
//!
//! # Module layout
//! - `backend`: `KvBackend` trait, in-memory and directory backends
//! - `secure_storage`: OS keyring backend for the key slot
//! - `crypto`: AEAD, key type, checksums
//! - `key_manager`: device key lifecycle
//! - `blob_store`: secure key/value façade
//! - `records`: record kinds and seed data
//! - `collection`: write-through collections and `RecordStore`
//! - `secure_records`: typed secure-tier documents
//! - `passcode`: local passcode gate
//! - `integrity`: periodic checksum monitor
//! - `export`: JSON export snapshots
//! - `config` / `paths`: configuration and data directory resolution
//! - `store`: `NestStore` application root

pub mod backend;
pub mod blob_store;
pub mod collection;
pub mod config;
pub mod crypto;
pub mod error;
pub mod export;
pub mod integrity;
pub mod key_manager;
pub mod passcode;
pub mod paths;
pub mod records;
pub mod secure_records;
pub mod secure_storage;
pub mod store;

pub use blob_store::{EncryptionMode, SecureBlobStore};
pub use collection::{Collection, RecordStore, Sensitivity};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use integrity::{CorruptionEvent, IntegrityMonitor, MonitorHandle};
pub use key_manager::KeyManager;
pub use passcode::PasscodeGate;
pub use store::NestStore;
