use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};

use crate::error::Result;
use crate::interfaces::scheduler::{ScheduledJob, StopSignal};
use crate::reminders::ReminderStore;

/// Clears every reminder once the local calendar date changes. The first
/// check after start only records the current date.
pub struct DailyResetJob {
    store: Arc<ReminderStore>,
    interval: Duration,
    last_seen: Mutex<Option<NaiveDate>>,
}

impl DailyResetJob {
    pub fn new(store: Arc<ReminderStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            last_seen: Mutex::new(None),
        }
    }

    /// Returns the number of reminders removed.
    pub async fn check_on(&self, today: NaiveDate) -> Result<usize> {
        let previous = {
            let mut last_seen = match self.last_seen.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            last_seen.replace(today)
        };
        match previous {
            Some(day) if day < today => {
                let cleared = self.store.clear_all().await?;
                tracing::info!(cleared, "new day; reminders reset");
                Ok(cleared)
            }
            _ => Ok(0),
        }
    }
}

#[async_trait]
impl ScheduledJob for DailyResetJob {
    fn name(&self) -> &str {
        "daily_reset"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self, _stop: &StopSignal) -> Result<()> {
        self.check_on(Local::now().date_naive()).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{derive_key, generate_salt, FieldCipher, KdfParams, KeySession};
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn clears_only_when_the_date_advances() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(KeySession::new());
        let key = derive_key(b"pw", &generate_salt().unwrap(), &KdfParams::light()).unwrap();
        session.install(FieldCipher::new(&key));
        let store = Arc::new(
            ReminderStore::open(
                dir.path().join("reset.db").to_string_lossy(),
                session,
            )
            .await
            .unwrap(),
        );
        let due = Utc.with_ymd_and_hms(2026, 10, 18, 20, 0, 0).unwrap();
        store.create("stretch", due).await.unwrap();
        store.create("journal", due).await.unwrap();

        let job = DailyResetJob::new(store.clone(), Duration::from_secs(60));
        let day = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();

        assert_eq!(job.check_on(day).await.unwrap(), 0);
        assert_eq!(job.check_on(day).await.unwrap(), 0);
        assert_eq!(store.count_pending().await.unwrap(), 2);

        let next = day.succ_opt().unwrap();
        assert_eq!(job.check_on(next).await.unwrap(), 2);
        assert_eq!(store.count_pending().await.unwrap(), 0);
    }
}
