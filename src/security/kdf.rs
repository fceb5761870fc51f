use rand::rngs::SysRng;
use rand::TryRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{ReminderVaultError, Result};

pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const ALGORITHM_ARGON2ID: &str = "argon2id";
pub const ARGON2_VERSION_0X13: u32 = 0x13;

const MIB: u32 = 1024;

/// Work-factor configuration for passphrase derivation.
///
/// Stored next to the salt for every database, so a file created with one
/// set of parameters keeps deriving the same key after the defaults change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub version: u32,
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub output_len: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            algorithm: ALGORITHM_ARGON2ID.to_string(),
            version: ARGON2_VERSION_0X13,
            memory_kib: 64 * MIB,
            iterations: 3,
            parallelism: 1,
            output_len: KEY_LEN as u32,
        }
    }
}

impl KdfParams {
    /// Low-cost parameters, still argon2id, for short-lived or throwaway stores.
    pub fn light() -> Self {
        Self {
            memory_kib: 256,
            iterations: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.algorithm != ALGORITHM_ARGON2ID {
            return Err(ReminderVaultError::KeyDerivation(format!(
                "unsupported kdf algorithm `{}`",
                self.algorithm
            )));
        }
        if self.version != ARGON2_VERSION_0X13 {
            return Err(ReminderVaultError::KeyDerivation(format!(
                "unsupported argon2 version {:#x}",
                self.version
            )));
        }
        if self.output_len as usize != KEY_LEN {
            return Err(ReminderVaultError::KeyDerivation(format!(
                "kdf output length must be {KEY_LEN}, got {}",
                self.output_len
            )));
        }
        self.argon2_params().map(|_| ())
    }

    fn argon2_params(&self) -> Result<argon2::Params> {
        argon2::Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(self.output_len as usize),
        )
        .map_err(|e| ReminderVaultError::KeyDerivation(format!("invalid kdf parameters: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_LEN]);

impl Salt {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; SALT_LEN] = bytes.try_into().map_err(|_| {
            ReminderVaultError::KeyDerivation(format!(
                "salt must be {SALT_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

pub fn generate_salt() -> Result<Salt> {
    let mut bytes = [0u8; SALT_LEN];
    let mut rng = SysRng;
    rng.try_fill_bytes(&mut bytes)
        .map_err(|e| ReminderVaultError::KeyDerivation(format!("salt generation failed: {e}")))?;
    Ok(Salt(bytes))
}

/// Key bytes produced by [`derive_key`]. Zeroed when dropped.
pub struct DerivedKey(Zeroizing<[u8; KEY_LEN]>);

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

pub fn derive_key(passphrase: &[u8], salt: &Salt, params: &KdfParams) -> Result<DerivedKey> {
    params.validate()?;
    let argon2 = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        params.argon2_params()?,
    );

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase, salt.as_bytes(), key.as_mut())
        .map_err(|e| ReminderVaultError::KeyDerivation(format!("key derivation failed: {e}")))?;
    Ok(DerivedKey(key))
}
