use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use zeroize::Zeroizing;

use crate::error::{ReminderVaultError, Result};
use crate::security::cipher::{Field, FieldCipher};

/// Holds the field cipher for the unlocked lifetime of a vault.
///
/// An empty slot means locked. Each field operation holds the read lock for
/// its own duration only, and [`KeySession::lock`] takes the write lock, so
/// once `lock` returns no caller can still decrypt with the dropped key.
#[derive(Default)]
pub struct KeySession {
    cipher: RwLock<Option<FieldCipher>>,
}

impl KeySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, cipher: FieldCipher) {
        *self.write_slot() = Some(cipher);
        tracing::debug!("key session unlocked");
    }

    pub fn lock(&self) {
        let previous = self.write_slot().take();
        if previous.is_some() {
            tracing::debug!("key session locked");
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.read_slot().is_some()
    }

    pub fn encrypt(&self, field: Field, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self.read_slot().as_ref() {
            Some(cipher) => cipher.encrypt(field, plaintext),
            None => Err(ReminderVaultError::AuthenticationFailure),
        }
    }

    pub fn decrypt(&self, field: Field, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        match self.read_slot().as_ref() {
            Some(cipher) => cipher.decrypt(field, blob),
            None => Err(ReminderVaultError::AuthenticationFailure),
        }
    }

    pub fn decrypt_string(&self, field: Field, blob: &[u8]) -> Result<Zeroizing<String>> {
        match self.read_slot().as_ref() {
            Some(cipher) => cipher.decrypt_string(field, blob),
            None => Err(ReminderVaultError::AuthenticationFailure),
        }
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, Option<FieldCipher>> {
        match self.cipher.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Option<FieldCipher>> {
        match self.cipher.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
