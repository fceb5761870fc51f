pub mod alarm;
pub mod config;
pub mod db;
pub mod error;
pub mod interfaces;
pub mod logging;
pub mod reminders;
pub mod runtime_paths;
pub mod scheduler;
pub mod security;
pub mod service;
pub mod time_input;
pub mod vault;

pub type Result<T> = std::result::Result<T, error::ReminderVaultError>;

pub use crate::alarm::{Alert, AlertDelivery, AlertOrder, AlarmScheduler, AlarmState};
pub use crate::error::ReminderVaultError;
pub use crate::service::{Command, CommandOutcome, ReminderService};
pub use crate::vault::Vault;
