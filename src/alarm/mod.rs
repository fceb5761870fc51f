use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_fsm::*;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{ReminderVaultError, Result};
use crate::interfaces::scheduler::{ScheduledJob, StopSignal};
use crate::reminders::{PendingAlarm, ReminderStore};

mod delivery;

pub use crate::interfaces::alerts::AlertDelivery;
pub use delivery::{AlarmEvent, ChannelAlertDelivery, LogAlertDelivery};

state_machine! {
    alarm_flow(Locked)

    Locked(Unlock) => Unlocked,
    Unlocked(Lock) => Locked,
    Unlocked(AuthFailed) => Halted,
    Halted(Lock) => Locked
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    Locked,
    Unlocked,
    Halted,
}

/// Delivery order for reminders that fall due in the same cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertOrder {
    #[default]
    CreationOrder,
    /// Earliest due time first; ties keep creation order.
    DueTime,
}

/// One due reminder, decrypted for the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub id: i32,
    pub task: String,
    pub scheduled_time: DateTime<Utc>,
}

impl Drop for Alert {
    fn drop(&mut self) {
        self.task.zeroize();
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub examined: usize,
    pub fired: Vec<i32>,
    pub skipped: usize,
    pub interrupted: bool,
}

struct Lifecycle {
    machine: alarm_flow::StateMachine,
    state: AlarmState,
    last_error: Option<String>,
}

enum RowOutcome<T> {
    Ready(T),
    Skip,
    Interrupted,
}

/// Periodic due-reminder scan. Decrypts time fields only, then the task of
/// each due reminder, delivers it, and sets `fired` right after delivery.
pub struct AlarmScheduler {
    store: Arc<ReminderStore>,
    delivery: Arc<dyn AlertDelivery>,
    order: AlertOrder,
    interval: Duration,
    lifecycle: Mutex<Lifecycle>,
    scan_lock: tokio::sync::Mutex<()>,
}

impl AlarmScheduler {
    pub fn new(
        store: Arc<ReminderStore>,
        delivery: Arc<dyn AlertDelivery>,
        order: AlertOrder,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            delivery,
            order,
            interval,
            lifecycle: Mutex::new(Lifecycle {
                machine: alarm_flow::StateMachine::new(),
                state: AlarmState::Locked,
                last_error: None,
            }),
            scan_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> AlarmState {
        self.lifecycle().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.lifecycle().last_error.clone()
    }

    /// Locked -> Unlocked. Requires an unlocked key session.
    pub fn activate(&self) -> Result<()> {
        if !self.store.session().is_unlocked() {
            return Err(ReminderVaultError::AuthenticationFailure);
        }
        if self.state() == AlarmState::Unlocked {
            return Ok(());
        }
        self.transition(&alarm_flow::Input::Unlock, AlarmState::Unlocked)?;
        self.lifecycle().last_error = None;
        tracing::info!(interval_secs = self.interval.as_secs(), "alarm scan armed");
        Ok(())
    }

    /// Any state -> Locked.
    pub fn deactivate(&self) {
        if self.state() == AlarmState::Locked {
            return;
        }
        if let Err(err) = self.transition(&alarm_flow::Input::Lock, AlarmState::Locked) {
            tracing::warn!(error = %err, "alarm lifecycle refused lock transition");
            return;
        }
        tracing::info!("alarm scan locked");
    }

    /// Runs one scan cycle against `now`.
    ///
    /// Returns `AuthenticationFailure` (and moves to `Halted`) if a blob fails
    /// to authenticate while the session still holds a key. Storage errors on
    /// single rows and rows deleted mid-scan are skipped.
    pub async fn scan_at(&self, now: DateTime<Utc>, stop: &StopSignal) -> Result<ScanReport> {
        let _guard = self.scan_lock.lock().await;
        let mut report = ScanReport::default();
        if self.state() != AlarmState::Unlocked {
            return Ok(report);
        }

        let pending = self.store.pending_alarms().await?;
        let mut due: Vec<(PendingAlarm, DateTime<Utc>)> = Vec::new();
        for alarm in pending {
            if self.should_stop(stop) {
                report.interrupted = true;
                return Ok(report);
            }
            report.examined += 1;
            match self
                .check_row(alarm.id, self.store.decrypt_time(&alarm.encrypted_time))
                .await?
            {
                RowOutcome::Ready(due_at) if due_at <= now => due.push((alarm, due_at)),
                RowOutcome::Ready(_) => {}
                RowOutcome::Skip => report.skipped += 1,
                RowOutcome::Interrupted => {
                    report.interrupted = true;
                    return Ok(report);
                }
            }
        }

        if self.order == AlertOrder::DueTime {
            due.sort_by_key(|(_, due_at)| *due_at);
        }

        for (alarm, _) in due {
            if self.should_stop(stop) {
                report.interrupted = true;
                break;
            }
            let fields = match self
                .check_row(alarm.id, self.store.get_full(alarm.id).await)
                .await?
            {
                RowOutcome::Ready(fields) => fields,
                RowOutcome::Skip => {
                    report.skipped += 1;
                    continue;
                }
                RowOutcome::Interrupted => {
                    report.interrupted = true;
                    break;
                }
            };
            if fields.due_at > now {
                tracing::debug!(reminder_id = alarm.id, "reminder rescheduled during scan");
                continue;
            }

            let alert = Alert {
                id: alarm.id,
                task: fields.task.as_str().to_string(),
                scheduled_time: fields.due_at,
            };
            let delivered_time = fields.time_blob.clone();
            drop(fields);

            if let Err(err) = self.delivery.deliver(&alert).await {
                tracing::warn!(reminder_id = alarm.id, error = %err, "alert delivery failed; reminder stays armed");
                report.skipped += 1;
                continue;
            }

            match self.store.mark_fired(alarm.id, &delivered_time).await {
                Ok(true) => {
                    tracing::info!(reminder_id = alarm.id, "reminder fired");
                    report.fired.push(alarm.id);
                }
                Ok(false) => {
                    tracing::debug!(reminder_id = alarm.id, "reminder changed after delivery; left armed");
                }
                Err(err) => {
                    tracing::warn!(reminder_id = alarm.id, error = %err, "could not record fired flag");
                    report.skipped += 1;
                }
            }
        }

        tracing::debug!(
            examined = report.examined,
            fired = report.fired.len(),
            skipped = report.skipped,
            interrupted = report.interrupted,
            "alarm scan complete"
        );
        Ok(report)
    }

    async fn check_row<T>(&self, id: i32, result: Result<T>) -> Result<RowOutcome<T>> {
        match result {
            Ok(value) => Ok(RowOutcome::Ready(value)),
            Err(ReminderVaultError::NotFound(_)) => {
                tracing::debug!(reminder_id = id, "reminder removed during scan");
                Ok(RowOutcome::Skip)
            }
            Err(ReminderVaultError::StorageIo(message)) => {
                tracing::warn!(reminder_id = id, error = %message, "skipping unreadable reminder");
                Ok(RowOutcome::Skip)
            }
            Err(ReminderVaultError::AuthenticationFailure)
                if !self.store.session().is_unlocked() =>
            {
                Ok(RowOutcome::Interrupted)
            }
            Err(ReminderVaultError::AuthenticationFailure) => {
                self.halt(id).await;
                Err(ReminderVaultError::AuthenticationFailure)
            }
            Err(other) => Err(other),
        }
    }

    async fn halt(&self, id: i32) {
        let error = ReminderVaultError::AuthenticationFailure;
        if let Err(err) = self.transition(&alarm_flow::Input::AuthFailed, AlarmState::Halted) {
            tracing::warn!(error = %err, "alarm lifecycle refused halt transition");
        }
        self.lifecycle().last_error = Some(error.to_string());
        tracing::error!(reminder_id = id, "alarm scan halted: stored data failed authentication");
        self.delivery.halted(&error).await;
    }

    fn should_stop(&self, stop: &StopSignal) -> bool {
        stop.is_stopped() || !self.store.session().is_unlocked()
    }

    fn transition(&self, input: &alarm_flow::Input, next: AlarmState) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        let current = lifecycle.state;
        lifecycle.machine.consume(input).map_err(|_| {
            ReminderVaultError::Runtime(format!("invalid alarm transition from {current:?}"))
        })?;
        lifecycle.state = next;
        Ok(())
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        match self.lifecycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ScheduledJob for AlarmScheduler {
    fn name(&self) -> &str {
        "alarm_scan"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, stop: &StopSignal) -> Result<()> {
        if self.state() != AlarmState::Unlocked {
            return Ok(());
        }
        self.scan_at(Utc::now(), stop).await.map(|_| ())
    }
}
