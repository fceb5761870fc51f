use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::alarm::{AlarmScheduler, AlarmState, AlertDelivery};
use crate::config::Config;
use crate::error::{ReminderVaultError, Result};
use crate::reminders::{ReminderStore, VaultMeta};
use crate::scheduler::{DailyResetJob, Scheduler};
use crate::security::{derive_key, generate_salt, Field, FieldCipher, KdfParams, KeySession, Salt};
use crate::service::ReminderService;

const CANARY_PLAINTEXT: &[u8] = b"reminder-vault:canary:v1";

/// Owns the key session, the encrypted store and the background jobs.
/// Everything starts locked; [`Vault::unlock`] installs the key and arms
/// the alarm scan, [`Vault::lock`] reverses both.
pub struct Vault {
    config: Config,
    session: Arc<KeySession>,
    store: Arc<ReminderStore>,
    alarm: Arc<AlarmScheduler>,
    service: ReminderService,
    scheduler: Mutex<Scheduler>,
}

impl Vault {
    pub async fn open(config: Config, delivery: Arc<dyn AlertDelivery>) -> Result<Self> {
        config.validate()?;
        let session = Arc::new(KeySession::new());
        let store = Arc::new(ReminderStore::open(config.resolved_db_path(), session.clone()).await?);
        let alarm = Arc::new(AlarmScheduler::new(
            store.clone(),
            delivery,
            config.alert_order,
            config.scan_interval(),
        ));

        let mut scheduler = Scheduler::new();
        scheduler.register_job(alarm.clone());
        if config.daily_reset {
            scheduler.register_job(Arc::new(DailyResetJob::new(
                store.clone(),
                config.daily_reset_interval(),
            )));
        }

        Ok(Self {
            service: ReminderService::new(store.clone()),
            config,
            session,
            store,
            alarm,
            scheduler: Mutex::new(scheduler),
        })
    }

    /// Verifies `passphrase`, installs the key, and starts the alarm scan.
    /// A fresh database is initialized with this passphrase.
    pub async fn unlock(&self, passphrase: &str) -> Result<()> {
        let mut scheduler = self.scheduler.lock().await;
        self.install_key(passphrase).await?;
        self.alarm.activate()?;
        scheduler.start();
        tracing::info!("vault unlocked");
        Ok(())
    }

    /// Installs the key without starting background jobs.
    pub async fn unlock_session(&self, passphrase: &str) -> Result<()> {
        let _scheduler = self.scheduler.lock().await;
        self.install_key(passphrase).await
    }

    /// Drops the key and stops background jobs. Decrypts after this returns
    /// fail with `AuthenticationFailure`.
    pub async fn lock(&self) {
        self.session.lock();
        self.alarm.deactivate();
        self.scheduler.lock().await.stop().await;
        tracing::info!("vault locked");
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.is_unlocked()
    }

    pub fn alarm_state(&self) -> AlarmState {
        self.alarm.state()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<ReminderStore> {
        &self.store
    }

    pub fn alarm(&self) -> &Arc<AlarmScheduler> {
        &self.alarm
    }

    pub fn service(&self) -> &ReminderService {
        &self.service
    }

    /// True once a passphrase has been set for this database.
    pub async fn is_initialized(&self) -> Result<bool> {
        Ok(self.store.load_meta().await?.is_some())
    }

    // Every candidate is checked against the canary, even when a key is
    // already installed; a passing check keeps the installed cipher.
    async fn install_key(&self, passphrase: &str) -> Result<()> {
        if passphrase.is_empty() {
            return Err(ReminderVaultError::Validation(
                "passphrase must not be empty".to_string(),
            ));
        }
        let passphrase = Zeroizing::new(passphrase.as_bytes().to_vec());

        let cipher = match self.store.load_meta().await? {
            Some(meta) => verify_passphrase(passphrase, meta).await?,
            None => self.initialize(passphrase).await?,
        };
        if !self.session.is_unlocked() {
            self.session.install(cipher);
        }
        Ok(())
    }

    async fn initialize(&self, passphrase: Zeroizing<Vec<u8>>) -> Result<FieldCipher> {
        let salt = generate_salt()?;
        let params = self.config.kdf.clone();
        let cipher = derive_cipher(passphrase, salt.clone(), params.clone()).await?;
        let meta = VaultMeta {
            salt,
            params,
            canary: cipher.encrypt(Field::Canary, CANARY_PLAINTEXT)?,
            created_at: Utc::now().timestamp_millis(),
        };
        self.store.init_meta(&meta).await?;
        Ok(cipher)
    }
}

/// Stored parameters that cannot be used are a `KeyDerivation` error; a key
/// that does not open the canary is always `InvalidPassphrase`.
async fn verify_passphrase(passphrase: Zeroizing<Vec<u8>>, meta: VaultMeta) -> Result<FieldCipher> {
    let cipher = derive_cipher(passphrase, meta.salt, meta.params).await?;
    match cipher.decrypt(Field::Canary, &meta.canary) {
        Ok(plain) if plain.as_slice() == CANARY_PLAINTEXT => Ok(cipher),
        _ => {
            tracing::warn!("unlock rejected");
            Err(ReminderVaultError::InvalidPassphrase)
        }
    }
}

async fn derive_cipher(
    passphrase: Zeroizing<Vec<u8>>,
    salt: Salt,
    params: KdfParams,
) -> Result<FieldCipher> {
    tokio::task::spawn_blocking(move || {
        let key = derive_key(&passphrase, &salt, &params)?;
        Ok::<_, ReminderVaultError>(FieldCipher::new(&key))
    })
    .await
    .map_err(|e| ReminderVaultError::Runtime(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::ChannelAlertDelivery;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        Config {
            kdf: KdfParams::light(),
            ..Config::convention_defaults(&dir.path().join("vault.db").to_string_lossy())
        }
    }

    #[tokio::test]
    async fn first_unlock_initializes_then_requires_same_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let (delivery, _rx) = ChannelAlertDelivery::new();
        let delivery: Arc<dyn AlertDelivery> = Arc::new(delivery);

        let vault = Vault::open(test_config(&dir), delivery.clone()).await.unwrap();
        assert_eq!(vault.alarm_state(), AlarmState::Locked);
        vault.unlock("open sesame").await.unwrap();
        assert!(vault.is_unlocked());
        assert_eq!(vault.alarm_state(), AlarmState::Unlocked);
        vault.lock().await;
        assert!(!vault.is_unlocked());
        assert_eq!(vault.alarm_state(), AlarmState::Locked);

        let err = vault.unlock("open sesamE").await.unwrap_err();
        assert!(matches!(err, ReminderVaultError::InvalidPassphrase));
        assert_eq!(err.to_string(), "incorrect passphrase");
        assert!(!vault.is_unlocked());
        assert_eq!(vault.alarm_state(), AlarmState::Locked);

        vault.unlock("open sesame").await.unwrap();
        assert!(vault.is_unlocked());
        vault.lock().await;
    }

    #[tokio::test]
    async fn stored_params_win_over_config() {
        let dir = tempfile::tempdir().unwrap();
        let (delivery, _rx) = ChannelAlertDelivery::new();
        let delivery: Arc<dyn AlertDelivery> = Arc::new(delivery);

        let vault = Vault::open(test_config(&dir), delivery.clone()).await.unwrap();
        vault.unlock_session("pw").await.unwrap();
        let stored = vault.store().load_meta().await.unwrap().unwrap();
        assert_eq!(stored.params, KdfParams::light());
        drop(vault);

        let mut config = test_config(&dir);
        config.kdf.iterations = 2;
        let reopened = Vault::open(config, delivery).await.unwrap();
        reopened.unlock_session("pw").await.unwrap();
        assert_eq!(reopened.alarm_state(), AlarmState::Locked);
    }

    #[tokio::test]
    async fn wrong_passphrase_is_rejected_while_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let (delivery, _rx) = ChannelAlertDelivery::new();
        let vault = Vault::open(test_config(&dir), Arc::new(delivery)).await.unwrap();
        assert!(!vault.is_initialized().await.unwrap());

        vault.unlock_session("right").await.unwrap();
        assert!(vault.is_initialized().await.unwrap());
        let id = vault
            .store()
            .create("water plants", Utc::now())
            .await
            .unwrap();

        assert!(matches!(
            vault.unlock("totally wrong").await,
            Err(ReminderVaultError::InvalidPassphrase)
        ));
        assert!(matches!(
            vault.unlock_session("totally wrong").await,
            Err(ReminderVaultError::InvalidPassphrase)
        ));
        assert_eq!(vault.alarm_state(), AlarmState::Locked);
        assert!(vault.is_unlocked());
        assert_eq!(
            vault.store().get_full(id).await.unwrap().task.as_str(),
            "water plants"
        );

        vault.unlock("right").await.unwrap();
        assert_eq!(vault.alarm_state(), AlarmState::Unlocked);
        vault.lock().await;
    }

    #[tokio::test]
    async fn empty_passphrase_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (delivery, _rx) = ChannelAlertDelivery::new();
        let vault = Vault::open(test_config(&dir), Arc::new(delivery)).await.unwrap();
        assert!(matches!(
            vault.unlock("").await,
            Err(ReminderVaultError::Validation(_))
        ));
        assert!(vault.store().load_meta().await.unwrap().is_none());
    }
}
