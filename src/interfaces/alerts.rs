use async_trait::async_trait;

use crate::alarm::Alert;
use crate::error::{ReminderVaultError, Result};

/// Receives due reminders from the alarm scan. Rendering, speech, and
/// notification belong to the implementor.
#[async_trait]
pub trait AlertDelivery: Send + Sync {
    /// An `Err` leaves the reminder armed; it is offered again next cycle.
    async fn deliver(&self, alert: &Alert) -> Result<()>;

    /// Called once when the scan halts on a key failure.
    async fn halted(&self, _error: &ReminderVaultError) {}
}
