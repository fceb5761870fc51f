use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReminderVaultError {
    /// Unlock failed. Deliberately says nothing about whether the passphrase
    /// was wrong or the stored canary was damaged.
    #[error("incorrect passphrase")]
    InvalidPassphrase,
    #[error("authentication failure: ciphertext rejected or key unavailable")]
    AuthenticationFailure,
    #[error("reminder {0} not found")]
    NotFound(i32),
    #[error("storage error: {0}")]
    StorageIo(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("key derivation error: {0}")]
    KeyDerivation(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl ReminderVaultError {
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            ReminderVaultError::AuthenticationFailure | ReminderVaultError::InvalidPassphrase
        )
    }
}

impl From<diesel::result::Error> for ReminderVaultError {
    fn from(err: diesel::result::Error) -> Self {
        ReminderVaultError::StorageIo(err.to_string())
    }
}

impl From<std::io::Error> for ReminderVaultError {
    fn from(err: std::io::Error) -> Self {
        ReminderVaultError::StorageIo(err.to_string())
    }
}

pub use crate::Result;
