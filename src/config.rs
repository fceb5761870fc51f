use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::alarm::AlertOrder;
use crate::error::{ReminderVaultError, Result};
use crate::security::KdfParams;

fn default_scan_interval_secs() -> u64 {
    30
}

fn default_daily_reset_check_secs() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// SQLite file; the per-user data directory when unset.
    #[serde(default, alias = "sqlite_path")]
    pub database_path: Option<String>,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Parameters used when a new database is initialized. Existing
    /// databases keep the parameters stored alongside their salt.
    #[serde(default)]
    pub kdf: KdfParams,
    #[serde(default)]
    pub alert_order: AlertOrder,
    #[serde(default)]
    pub daily_reset: bool,
    #[serde(default = "default_daily_reset_check_secs")]
    pub daily_reset_check_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            scan_interval_secs: default_scan_interval_secs(),
            kdf: KdfParams::default(),
            alert_order: AlertOrder::default(),
            daily_reset: false,
            daily_reset_check_secs: default_daily_reset_check_secs(),
        }
    }
}

impl Config {
    pub fn convention_defaults(db_path: &str) -> Self {
        Self {
            database_path: Some(db_path.to_string()),
            ..Self::default()
        }
    }

    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| ReminderVaultError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(raw).map_err(|e| ReminderVaultError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        crate::runtime_paths::ensure_private_parent_dir(path)?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ReminderVaultError::Config(e.to_string()))?;
        fs::write(path, json)?;
        crate::runtime_paths::restrict_file_permissions(path);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_interval_secs == 0 {
            return Err(ReminderVaultError::Config(
                "scan_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.daily_reset && self.daily_reset_check_secs == 0 {
            return Err(ReminderVaultError::Config(
                "daily_reset_check_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(path) = &self.database_path {
            if path.trim().is_empty() {
                return Err(ReminderVaultError::Config(
                    "database_path must not be empty".to_string(),
                ));
            }
        }
        self.kdf
            .validate()
            .map_err(|e| ReminderVaultError::Config(format!("kdf: {e}")))
    }

    pub fn resolved_db_path(&self) -> String {
        self.database_path
            .clone()
            .unwrap_or_else(crate::runtime_paths::default_db_path)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn daily_reset_interval(&self) -> Duration {
        Duration::from_secs(self.daily_reset_check_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_takes_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.scan_interval(), Duration::from_secs(30));
        assert_eq!(config.alert_order, AlertOrder::CreationOrder);
        assert!(!config.daily_reset);
    }

    #[test]
    fn parses_overrides() {
        let config = Config::from_json(
            r#"{
                "sqlite_path": "/tmp/r.db",
                "scan_interval_secs": 5,
                "alert_order": "due_time",
                "daily_reset": true
            }"#,
        )
        .unwrap();
        assert_eq!(config.database_path.as_deref(), Some("/tmp/r.db"));
        assert_eq!(config.scan_interval_secs, 5);
        assert_eq!(config.alert_order, AlertOrder::DueTime);
        assert!(config.daily_reset);
        assert_eq!(config.resolved_db_path(), "/tmp/r.db");
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = Config::from_json(r#"{"scan_interval_secs": 0}"#).unwrap_err();
        assert!(matches!(err, ReminderVaultError::Config(_)));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            Config::from_json("{not json"),
            Err(ReminderVaultError::Config(_))
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("config.json");
        let config = Config {
            kdf: KdfParams::light(),
            ..Config::convention_defaults("/var/tmp/reminders.db")
        };
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }
}
