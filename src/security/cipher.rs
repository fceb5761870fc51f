use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::SysRng;
use rand::TryRng;
use zeroize::Zeroizing;

use crate::error::{ReminderVaultError, Result};
use crate::security::kdf::DerivedKey;

const BLOB_VERSION: u8 = 1;
const CIPHER_XCHACHA20_POLY1305: u8 = 1;
const HEADER_LEN: usize = 2;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Which column a ciphertext belongs to. Bound into the AEAD associated data,
/// so a blob only decrypts as the field it was written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Task,
    Time,
    Canary,
}

impl Field {
    fn label(self) -> &'static [u8] {
        match self {
            Field::Task => b"reminder-vault/v1/task",
            Field::Time => b"reminder-vault/v1/time",
            Field::Canary => b"reminder-vault/v1/canary",
        }
    }
}

fn associated_data(field: Field, header: &[u8]) -> Vec<u8> {
    let label = field.label();
    let mut aad = Vec::with_capacity(label.len() + header.len());
    aad.extend_from_slice(label);
    aad.extend_from_slice(header);
    aad
}

/// Authenticated per-field encryption under one derived key.
///
/// Blob layout: `version | cipher id | nonce (24) | ciphertext + tag`.
pub struct FieldCipher {
    cipher: XChaCha20Poly1305,
}

impl FieldCipher {
    pub fn new(key: &DerivedKey) -> Self {
        let key = Key::from(*key.as_bytes());
        Self {
            cipher: XChaCha20Poly1305::new(&key),
        }
    }

    pub fn encrypt(&self, field: Field, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        let mut rng = SysRng;
        rng.try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| ReminderVaultError::Runtime(format!("nonce generation failed: {e}")))?;

        let header = [BLOB_VERSION, CIPHER_XCHACHA20_POLY1305];
        let aad = associated_data(field, &header);
        let nonce = XNonce::from(nonce_bytes);
        let sealed = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| ReminderVaultError::Runtime("AEAD encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + NONCE_LEN + sealed.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Every malformed, tampered, or foreign blob maps to
    /// [`ReminderVaultError::AuthenticationFailure`].
    pub fn decrypt(&self, field: Field, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if blob.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
            return Err(ReminderVaultError::AuthenticationFailure);
        }
        let (header, rest) = blob.split_at(HEADER_LEN);
        if header[0] != BLOB_VERSION || header[1] != CIPHER_XCHACHA20_POLY1305 {
            return Err(ReminderVaultError::AuthenticationFailure);
        }
        let (nonce_bytes, sealed) = rest.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);
        let aad = associated_data(field, header);

        let plaintext = self
            .cipher
            .decrypt(
                nonce,
                Payload {
                    msg: sealed,
                    aad: &aad,
                },
            )
            .map_err(|_| ReminderVaultError::AuthenticationFailure)?;
        Ok(Zeroizing::new(plaintext))
    }

    pub fn decrypt_string(&self, field: Field, blob: &[u8]) -> Result<Zeroizing<String>> {
        let bytes = self.decrypt(field, blob)?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| ReminderVaultError::AuthenticationFailure)?
            .to_string();
        Ok(Zeroizing::new(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::kdf::{derive_key, generate_salt, KdfParams};

    fn cipher(passphrase: &str) -> FieldCipher {
        let salt = generate_salt().unwrap();
        let key = derive_key(passphrase.as_bytes(), &salt, &KdfParams::light()).unwrap();
        FieldCipher::new(&key)
    }

    #[test]
    fn roundtrip_each_field_independently() {
        let cipher = cipher("pw");
        let task = cipher.encrypt(Field::Task, b"take medication").unwrap();
        let time = cipher
            .encrypt(Field::Time, b"2026-10-18T09:00:00+00:00")
            .unwrap();

        assert_eq!(
            cipher.decrypt(Field::Time, &time).unwrap().as_slice(),
            b"2026-10-18T09:00:00+00:00"
        );
        assert_eq!(
            cipher.decrypt(Field::Task, &task).unwrap().as_slice(),
            b"take medication"
        );
    }

    #[test]
    fn nonces_are_fresh_per_call() {
        let cipher = cipher("pw");
        let a = cipher.encrypt(Field::Task, b"same").unwrap();
        let b = cipher.encrypt(Field::Task, b"same").unwrap();
        assert_ne!(a, b);
        assert_ne!(&a[HEADER_LEN..HEADER_LEN + NONCE_LEN], &b[HEADER_LEN..HEADER_LEN + NONCE_LEN]);
    }

    #[test]
    fn any_flipped_bit_fails_closed() {
        let cipher = cipher("pw");
        let blob = cipher.encrypt(Field::Task, b"call the pharmacy").unwrap();

        for index in 0..blob.len() {
            for bit in [0x01u8, 0x80] {
                let mut tampered = blob.clone();
                tampered[index] ^= bit;
                let err = cipher.decrypt(Field::Task, &tampered).unwrap_err();
                assert!(
                    matches!(err, ReminderVaultError::AuthenticationFailure),
                    "byte {index} bit {bit:#x} was not rejected"
                );
            }
        }
    }

    #[test]
    fn truncation_fails_closed() {
        let cipher = cipher("pw");
        let blob = cipher.encrypt(Field::Time, b"2026-10-18T09:00:00Z").unwrap();
        for len in [0, 1, HEADER_LEN + NONCE_LEN, blob.len() - 1] {
            assert!(matches!(
                cipher.decrypt(Field::Time, &blob[..len]),
                Err(ReminderVaultError::AuthenticationFailure)
            ));
        }
    }

    #[test]
    fn wrong_key_fails_closed() {
        let a = cipher("pw-a");
        let b = cipher("pw-b");
        let blob = a.encrypt(Field::Task, b"secret").unwrap();
        assert!(matches!(
            b.decrypt(Field::Task, &blob),
            Err(ReminderVaultError::AuthenticationFailure)
        ));
    }

    #[test]
    fn blob_is_bound_to_its_field() {
        let cipher = cipher("pw");
        let time = cipher.encrypt(Field::Time, b"2026-10-18T09:00:00Z").unwrap();
        assert!(matches!(
            cipher.decrypt(Field::Task, &time),
            Err(ReminderVaultError::AuthenticationFailure)
        ));
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let cipher = cipher("pw");
        let blob = cipher.encrypt(Field::Task, b"").unwrap();
        assert!(cipher.decrypt(Field::Task, &blob).unwrap().is_empty());
    }
}
