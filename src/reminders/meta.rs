use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::schema::vault_meta;
use super::ReminderStore;
use crate::error::{ReminderVaultError, Result};
use crate::security::{KdfParams, Salt};

const META_ROW_ID: i32 = 1;

/// Non-secret material needed to re-derive the vault key: salt, KDF
/// parameters, and the canary ciphertext used to validate a passphrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultMeta {
    pub salt: Salt,
    pub params: KdfParams,
    pub canary: Vec<u8>,
    pub created_at: i64,
}

#[derive(Queryable, Insertable)]
#[diesel(table_name = vault_meta)]
struct MetaRow {
    id: i32,
    salt: Vec<u8>,
    kdf_algorithm: String,
    kdf_version: i32,
    kdf_memory_kib: i32,
    kdf_iterations: i32,
    kdf_parallelism: i32,
    kdf_output_len: i32,
    canary: Vec<u8>,
    created_at: i64,
}

fn to_column(value: u32, name: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| ReminderVaultError::KeyDerivation(format!("{name} out of range: {value}")))
}

fn from_column(value: i32, name: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| ReminderVaultError::KeyDerivation(format!("stored {name} is negative")))
}

impl MetaRow {
    fn from_meta(meta: &VaultMeta) -> Result<Self> {
        Ok(Self {
            id: META_ROW_ID,
            salt: meta.salt.as_bytes().to_vec(),
            kdf_algorithm: meta.params.algorithm.clone(),
            kdf_version: to_column(meta.params.version, "kdf version")?,
            kdf_memory_kib: to_column(meta.params.memory_kib, "kdf memory")?,
            kdf_iterations: to_column(meta.params.iterations, "kdf iterations")?,
            kdf_parallelism: to_column(meta.params.parallelism, "kdf parallelism")?,
            kdf_output_len: to_column(meta.params.output_len, "kdf output length")?,
            canary: meta.canary.clone(),
            created_at: meta.created_at,
        })
    }

    fn into_meta(self) -> Result<VaultMeta> {
        Ok(VaultMeta {
            salt: Salt::from_slice(&self.salt)?,
            params: KdfParams {
                algorithm: self.kdf_algorithm,
                version: from_column(self.kdf_version, "kdf version")?,
                memory_kib: from_column(self.kdf_memory_kib, "kdf memory")?,
                iterations: from_column(self.kdf_iterations, "kdf iterations")?,
                parallelism: from_column(self.kdf_parallelism, "kdf parallelism")?,
                output_len: from_column(self.kdf_output_len, "kdf output length")?,
            },
            canary: self.canary,
            created_at: self.created_at,
        })
    }
}

impl ReminderStore {
    pub async fn load_meta(&self) -> Result<Option<VaultMeta>> {
        let mut conn = self.conn().await?;
        let row: Option<MetaRow> = vault_meta::table
            .find(META_ROW_ID)
            .first(&mut conn)
            .await
            .optional()?;
        row.map(MetaRow::into_meta).transpose()
    }

    /// Writes the metadata row once. Fails if the vault was already initialized.
    pub async fn init_meta(&self, meta: &VaultMeta) -> Result<()> {
        let row = MetaRow::from_meta(meta)?;
        let mut conn = self.conn().await?;
        diesel::insert_into(vault_meta::table)
            .values(&row)
            .execute(&mut conn)
            .await?;
        tracing::info!(
            kdf_algorithm = %meta.params.algorithm,
            kdf_memory_kib = meta.params.memory_kib,
            kdf_iterations = meta.params.iterations,
            "vault metadata initialized"
        );
        Ok(())
    }
}
