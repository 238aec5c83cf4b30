//! Local passcode gate.
//!
//! The passcode is kept in the secure tier and compared as an exact string;
//! the enabled flag lives in a raw slot. There is no lockout or backoff after
//! failed attempts.

use std::sync::Arc;
use tracing::{info, warn};

use crate::blob_store::SecureBlobStore;
use crate::error::{Result, StoreError};

pub const PASSCODE_KEY: &str = "app_passcode";
pub const PASSCODE_ENABLED_KEY: &str = "passcode_enabled";
pub const MIN_PASSCODE_LEN: usize = 4;

const ENABLED: &[u8] = b"1";

pub struct PasscodeGate {
    secure: Arc<SecureBlobStore>,
}

impl PasscodeGate {
    pub fn new(secure: Arc<SecureBlobStore>) -> Self {
        Self { secure }
    }

    /// An unreadable flag counts as enabled so the gate fails closed.
    pub fn is_enabled(&self) -> bool {
        match self.secure.load_raw(PASSCODE_ENABLED_KEY) {
            Ok(flag) => flag.as_deref() == Some(ENABLED),
            Err(e) => {
                warn!(error = %e, "cannot read passcode flag, assuming enabled");
                true
            }
        }
    }

    /// Store `passcode` and enable the gate. Shorter than four characters is
    /// rejected without changing anything.
    pub fn set(&self, passcode: &str) -> bool {
        if passcode.chars().count() < MIN_PASSCODE_LEN {
            return false;
        }
        // Passcode and flag land in one batch so a failure changes neither.
        let stored = self.secure.store_with_raw(
            PASSCODE_KEY,
            passcode.as_bytes(),
            &[(PASSCODE_ENABLED_KEY, ENABLED)],
        );
        match stored {
            Ok(()) => {
                info!("passcode set");
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to store passcode");
                false
            }
        }
    }

    pub fn verify(&self, passcode: &str) -> bool {
        self.try_verify(passcode).is_ok()
    }

    /// Like [`verify`](Self::verify) but reports a rejected attempt as
    /// `PasscodeMismatch`. Storage failures are reported the same way so the
    /// caller learns nothing about why an attempt failed.
    pub fn try_verify(&self, passcode: &str) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        match self.secure.load_string(PASSCODE_KEY) {
            Ok(Some(stored)) if stored == passcode => Ok(()),
            Ok(_) => {
                warn!("passcode attempt rejected");
                Err(StoreError::PasscodeMismatch)
            }
            Err(e) => {
                warn!(error = %e, "stored passcode unreadable");
                Err(StoreError::PasscodeMismatch)
            }
        }
    }

    pub fn change(&self, old: &str, new: &str) -> bool {
        if !self.verify(old) {
            return false;
        }
        self.set(new)
    }

    /// Clear the stored passcode and disable the gate.
    pub fn remove(&self) -> Result<()> {
        self.secure.remove_raw(PASSCODE_ENABLED_KEY)?;
        self.secure.remove(PASSCODE_KEY)?;
        info!("passcode removed");
        Ok(())
    }
}
