use async_trait::async_trait;
use tokio::sync::mpsc;

use super::Alert;
use crate::error::{ReminderVaultError, Result};
use crate::interfaces::alerts::AlertDelivery;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmEvent {
    Alert(Alert),
    Halted(String),
}

/// Forwards alerts to a GUI or speech front end over an unbounded channel.
pub struct ChannelAlertDelivery {
    tx: mpsc::UnboundedSender<AlarmEvent>,
}

impl ChannelAlertDelivery {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AlarmEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AlertDelivery for ChannelAlertDelivery {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        self.tx
            .send(AlarmEvent::Alert(alert.clone()))
            .map_err(|_| ReminderVaultError::Runtime("alert receiver dropped".to_string()))
    }

    async fn halted(&self, error: &ReminderVaultError) {
        let _ = self.tx.send(AlarmEvent::Halted(error.to_string()));
    }
}

/// Prints alerts to stdout. Task text goes to the terminal only, never to the log.
#[derive(Debug, Default)]
pub struct LogAlertDelivery;

#[async_trait]
impl AlertDelivery for LogAlertDelivery {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let local = alert.scheduled_time.with_timezone(&chrono::Local);
        println!(
            "Reminder #{} ({}): {}",
            alert.id,
            local.format("%Y-%m-%d %H:%M"),
            alert.task
        );
        tracing::info!(reminder_id = alert.id, "alert delivered to terminal");
        Ok(())
    }

    async fn halted(&self, error: &ReminderVaultError) {
        eprintln!("Alarm scan stopped: {error}. Lock and unlock again to resume.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn channel_delivery_forwards_alerts_and_halts() {
        let (delivery, mut rx) = ChannelAlertDelivery::new();
        let alert = Alert {
            id: 3,
            task: "water plants".to_string(),
            scheduled_time: Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap(),
        };
        delivery.deliver(&alert).await.unwrap();
        delivery
            .halted(&ReminderVaultError::AuthenticationFailure)
            .await;

        assert_eq!(rx.recv().await, Some(AlarmEvent::Alert(alert)));
        assert!(matches!(rx.recv().await, Some(AlarmEvent::Halted(_))));
    }

    #[tokio::test]
    async fn channel_delivery_fails_when_receiver_is_gone() {
        let (delivery, rx) = ChannelAlertDelivery::new();
        drop(rx);
        let alert = Alert {
            id: 1,
            task: "x".to_string(),
            scheduled_time: Utc::now(),
        };
        assert!(delivery.deliver(&alert).await.is_err());
    }
}
