use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ReminderVaultError, Result};
use crate::reminders::{Reminder, ReminderFilter, ReminderStore, ReminderSummary};
use crate::time_input::{parse_due_time_local, validate_task_text};

const MAX_SNOOZE_MINUTES: i64 = 7 * 24 * 60;

/// One request from a front end (CLI, voice, GUI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Create {
        task: String,
        when: String,
    },
    List {
        #[serde(default)]
        include_completed: bool,
    },
    Edit {
        id: i32,
        #[serde(default)]
        task: Option<String>,
        #[serde(default)]
        when: Option<String>,
    },
    Complete {
        id: i32,
    },
    Delete {
        id: i32,
    },
    DeleteMatching {
        text: String,
    },
    CompleteMatching {
        text: String,
    },
    Snooze {
        id: i32,
        minutes: i64,
    },
    ClearAll,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandOutcome {
    Created { id: i32, due_at: DateTime<Utc> },
    Listed { reminders: Vec<Reminder> },
    Updated { id: i32 },
    Completed { ids: Vec<i32> },
    Deleted { ids: Vec<i32> },
    Snoozed { id: i32, due_at: DateTime<Utc> },
    Cleared { count: usize },
}

/// Plaintext task interface over the encrypted store. Inputs are validated
/// here; everything below this layer sees ciphertext or typed values.
#[derive(Clone)]
pub struct ReminderService {
    store: Arc<ReminderStore>,
}

impl ReminderService {
    pub fn new(store: Arc<ReminderStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ReminderStore> {
        &self.store
    }

    pub async fn create_reminder(&self, text: &str, when: &str) -> Result<(i32, DateTime<Utc>)> {
        let due_at = parse_due_time_local(when)?;
        let id = self.create_reminder_at(text, due_at).await?;
        Ok((id, due_at))
    }

    pub async fn create_reminder_at(&self, text: &str, due_at: DateTime<Utc>) -> Result<i32> {
        let task = validate_task_text(text)?;
        self.store.create(&task, due_at).await
    }

    pub async fn list_reminders(&self, include_completed: bool) -> Result<Vec<Reminder>> {
        self.store
            .list_decrypted(ReminderFilter::from_include_completed(include_completed))
            .await
    }

    /// Bookkeeping columns only; works while locked.
    pub async fn list_summaries(&self, include_completed: bool) -> Result<Vec<ReminderSummary>> {
        self.store
            .list(ReminderFilter::from_include_completed(include_completed))
            .await
    }

    pub async fn edit_reminder(&self, id: i32, text: Option<&str>, when: Option<&str>) -> Result<()> {
        let task = text.map(validate_task_text).transpose()?;
        let due_at = when.map(parse_due_time_local).transpose()?;
        self.store.update(id, task.as_deref(), due_at).await
    }

    pub async fn complete_reminder(&self, id: i32) -> Result<()> {
        self.store.complete(id).await
    }

    pub async fn reopen_reminder(&self, id: i32) -> Result<()> {
        self.store.reopen(id).await
    }

    /// Acknowledges a delivered alert; the reminder is done.
    pub async fn dismiss_alert(&self, id: i32) -> Result<()> {
        self.store.complete(id).await?;
        tracing::debug!(reminder_id = id, "alert dismissed");
        Ok(())
    }

    pub async fn delete_reminder(&self, id: i32) -> Result<()> {
        self.store.delete(id).await
    }

    pub async fn clear_all(&self) -> Result<usize> {
        self.store.clear_all().await
    }

    /// Pushes the due time `minutes` past the later of its current value and
    /// now, re-arming the alarm.
    pub async fn snooze_reminder(&self, id: i32, minutes: i64) -> Result<DateTime<Utc>> {
        if !(1..=MAX_SNOOZE_MINUTES).contains(&minutes) {
            return Err(ReminderVaultError::Validation(format!(
                "snooze must be between 1 and {MAX_SNOOZE_MINUTES} minutes"
            )));
        }
        let current = self.store.get_time_only(id).await?;
        let due_at = current.max(Utc::now()) + Duration::minutes(minutes);
        self.store.update(id, None, Some(due_at)).await?;
        Ok(due_at)
    }

    /// Deletes every open reminder whose task contains `text`.
    pub async fn delete_matching(&self, text: &str) -> Result<Vec<i32>> {
        let ids = self.matching_ids(text).await?;
        for id in &ids {
            self.store.delete(*id).await?;
        }
        tracing::debug!(count = ids.len(), "deleted reminders by text");
        Ok(ids)
    }

    pub async fn complete_matching(&self, text: &str) -> Result<Vec<i32>> {
        let ids = self.matching_ids(text).await?;
        for id in &ids {
            self.store.complete(*id).await?;
        }
        tracing::debug!(count = ids.len(), "completed reminders by text");
        Ok(ids)
    }

    pub async fn pending_count(&self) -> Result<i64> {
        self.store.count_pending().await
    }

    pub async fn execute(&self, command: Command) -> Result<CommandOutcome> {
        match command {
            Command::Create { task, when } => {
                let (id, due_at) = self.create_reminder(&task, &when).await?;
                Ok(CommandOutcome::Created { id, due_at })
            }
            Command::List { include_completed } => Ok(CommandOutcome::Listed {
                reminders: self.list_reminders(include_completed).await?,
            }),
            Command::Edit { id, task, when } => {
                self.edit_reminder(id, task.as_deref(), when.as_deref())
                    .await?;
                Ok(CommandOutcome::Updated { id })
            }
            Command::Complete { id } => {
                self.complete_reminder(id).await?;
                Ok(CommandOutcome::Completed { ids: vec![id] })
            }
            Command::Delete { id } => {
                self.delete_reminder(id).await?;
                Ok(CommandOutcome::Deleted { ids: vec![id] })
            }
            Command::DeleteMatching { text } => Ok(CommandOutcome::Deleted {
                ids: self.delete_matching(&text).await?,
            }),
            Command::CompleteMatching { text } => Ok(CommandOutcome::Completed {
                ids: self.complete_matching(&text).await?,
            }),
            Command::Snooze { id, minutes } => {
                let due_at = self.snooze_reminder(id, minutes).await?;
                Ok(CommandOutcome::Snoozed { id, due_at })
            }
            Command::ClearAll => Ok(CommandOutcome::Cleared {
                count: self.clear_all().await?,
            }),
        }
    }

    async fn matching_ids(&self, text: &str) -> Result<Vec<i32>> {
        if text.trim().is_empty() {
            return Err(ReminderVaultError::Validation(
                "match text must not be empty".to_string(),
            ));
        }
        let matches = self.store.find_by_task(text, ReminderFilter::Open).await?;
        Ok(matches.iter().map(|item| item.id).collect())
    }
}
