use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Encryption key unavailable")]
    KeyUnavailable,

    #[error("AEAD decryption failed (authentication tag mismatch, possible tampering)")]
    Authentication,

    #[error("AEAD encryption failed")]
    Encrypt,

    #[error("Decode failed for {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("Integrity mismatch for {key}")]
    IntegrityMismatch { key: String },

    #[error("Passcode mismatch")]
    PasscodeMismatch,

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record id: {0}")]
    DuplicateId(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
