use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use serde::Serialize;
use zeroize::{Zeroize, Zeroizing};

use crate::db::SqliteAsyncConn;
use crate::error::{ReminderVaultError, Result};
use crate::security::{Field, KeySession};

mod meta;
mod schema;
use schema::reminders;

pub use meta::VaultMeta;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

type SqlitePool = Pool<SqliteAsyncConn>;
type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

/// Plaintext bookkeeping for one reminder. Readable while locked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderSummary {
    pub id: i32,
    pub completed: bool,
    pub fired: bool,
    pub created_at: i64,
}

/// A reminder with its task and due time decrypted. The task text is wiped
/// from memory when the value is dropped.
#[derive(Debug, Clone, Serialize)]
pub struct Reminder {
    pub id: i32,
    pub task: String,
    pub due_at: DateTime<Utc>,
    pub completed: bool,
    pub fired: bool,
    pub created_at: i64,
}

impl Drop for Reminder {
    fn drop(&mut self) {
        self.task.zeroize();
    }
}

#[derive(Debug)]
pub struct DecryptedFields {
    pub task: Zeroizing<String>,
    pub due_at: DateTime<Utc>,
    /// The time ciphertext `due_at` was read from, for `mark_fired`.
    pub time_blob: Vec<u8>,
}

/// An unfired, open reminder as seen by the alarm scan: the id and the
/// still-encrypted time blob. The task ciphertext is never loaded.
#[derive(Debug, Clone)]
pub struct PendingAlarm {
    pub id: i32,
    pub created_at: i64,
    pub encrypted_time: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderFilter {
    Open,
    Completed,
    All,
}

impl ReminderFilter {
    pub fn from_include_completed(include_completed: bool) -> Self {
        if include_completed {
            ReminderFilter::All
        } else {
            ReminderFilter::Open
        }
    }
}

impl std::str::FromStr for ReminderFilter {
    type Err = ();

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match value {
            "completed" => ReminderFilter::Completed,
            "all" => ReminderFilter::All,
            _ => ReminderFilter::Open,
        })
    }
}

#[derive(Queryable)]
struct ReminderRow {
    id: i32,
    encrypted_task: Vec<u8>,
    encrypted_time: Vec<u8>,
    completed: bool,
    fired: bool,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = reminders)]
struct NewReminder {
    encrypted_task: Vec<u8>,
    encrypted_time: Vec<u8>,
    completed: bool,
    fired: bool,
    created_at: i64,
}

#[derive(AsChangeset)]
#[diesel(table_name = reminders)]
struct ReminderChanges {
    encrypted_task: Option<Vec<u8>>,
    encrypted_time: Option<Vec<u8>>,
    fired: Option<bool>,
}

/// Reminder table over SQLite. Task and time columns only ever hold
/// ciphertext produced through the shared [`KeySession`].
pub struct ReminderStore {
    pool: SqlitePool,
    session: Arc<KeySession>,
}

impl ReminderStore {
    pub async fn open(sqlite_path: impl AsRef<str>, session: Arc<KeySession>) -> Result<Self> {
        let sqlite_path = sqlite_path.as_ref();
        crate::runtime_paths::ensure_private_parent_dir(Path::new(sqlite_path))?;
        run_migrations(sqlite_path).await?;
        crate::runtime_paths::restrict_file_permissions(Path::new(sqlite_path));

        let manager = AsyncDieselConnectionManager::<SqliteAsyncConn>::new(sqlite_path);
        let pool: SqlitePool = Pool::builder()
            .build(manager)
            .await
            .map_err(|e| ReminderVaultError::StorageIo(e.to_string()))?;
        tracing::debug!(path = sqlite_path, "reminder store opened");
        Ok(Self { pool, session })
    }

    pub fn session(&self) -> &Arc<KeySession> {
        &self.session
    }

    pub async fn create(&self, task: &str, due_at: DateTime<Utc>) -> Result<i32> {
        let new = NewReminder {
            encrypted_task: self.session.encrypt(Field::Task, task.as_bytes())?,
            encrypted_time: self.encrypt_time(due_at)?,
            completed: false,
            fired: false,
            created_at: now_millis(),
        };

        let mut conn = self.conn().await?;
        let id = conn
            .transaction::<i32, diesel::result::Error, _>(|conn| {
                async move {
                    diesel::insert_into(reminders::table)
                        .values(&new)
                        .execute(conn)
                        .await?;
                    reminders::table
                        .select(reminders::id)
                        .order(reminders::id.desc())
                        .first::<i32>(conn)
                        .await
                }
                .scope_boxed()
            })
            .await?;
        tracing::debug!(reminder_id = id, "reminder created");
        Ok(id)
    }

    pub async fn list(&self, filter: ReminderFilter) -> Result<Vec<ReminderSummary>> {
        let mut conn = self.conn().await?;
        let rows: Vec<(i32, bool, bool, i64)> = filtered(filter)
            .select((
                reminders::id,
                reminders::completed,
                reminders::fired,
                reminders::created_at,
            ))
            .order((reminders::created_at.asc(), reminders::id.asc()))
            .load(&mut conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, completed, fired, created_at)| ReminderSummary {
                id,
                completed,
                fired,
                created_at,
            })
            .collect())
    }

    pub async fn summary(&self, id: i32) -> Result<ReminderSummary> {
        let mut conn = self.conn().await?;
        let row: Option<(i32, bool, bool, i64)> = reminders::table
            .find(id)
            .select((
                reminders::id,
                reminders::completed,
                reminders::fired,
                reminders::created_at,
            ))
            .first(&mut conn)
            .await
            .optional()?;
        let (id, completed, fired, created_at) = row.ok_or(ReminderVaultError::NotFound(id))?;
        Ok(ReminderSummary {
            id,
            completed,
            fired,
            created_at,
        })
    }

    pub async fn count(&self, filter: ReminderFilter) -> Result<i64> {
        let mut conn = self.conn().await?;
        let count = filtered(filter).count().get_result(&mut conn).await?;
        Ok(count)
    }

    /// Open reminders whose alert has not been delivered yet.
    pub async fn count_pending(&self) -> Result<i64> {
        let mut conn = self.conn().await?;
        let count = reminders::table
            .filter(reminders::completed.eq(false))
            .filter(reminders::fired.eq(false))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count)
    }

    pub async fn list_decrypted(&self, filter: ReminderFilter) -> Result<Vec<Reminder>> {
        let mut conn = self.conn().await?;
        let rows: Vec<ReminderRow> = filtered(filter)
            .order((reminders::created_at.asc(), reminders::id.asc()))
            .load(&mut conn)
            .await?;
        drop(conn);
        rows.into_iter().map(|row| self.decrypt_row(row)).collect()
    }

    pub async fn get_full(&self, id: i32) -> Result<DecryptedFields> {
        let mut conn = self.conn().await?;
        let row: Option<(Vec<u8>, Vec<u8>)> = reminders::table
            .find(id)
            .select((reminders::encrypted_task, reminders::encrypted_time))
            .first(&mut conn)
            .await
            .optional()?;
        let (task_blob, time_blob) = row.ok_or(ReminderVaultError::NotFound(id))?;
        Ok(DecryptedFields {
            task: self.session.decrypt_string(Field::Task, &task_blob)?,
            due_at: self.decrypt_time(&time_blob)?,
            time_blob,
        })
    }

    /// Decrypts the due time alone; the task column is not read.
    pub async fn get_time_only(&self, id: i32) -> Result<DateTime<Utc>> {
        let mut conn = self.conn().await?;
        let blob: Option<Vec<u8>> = reminders::table
            .find(id)
            .select(reminders::encrypted_time)
            .first(&mut conn)
            .await
            .optional()?;
        let blob = blob.ok_or(ReminderVaultError::NotFound(id))?;
        self.decrypt_time(&blob)
    }

    /// Re-encrypts only the supplied fields. A new due time re-arms the alarm.
    pub async fn update(
        &self,
        id: i32,
        task: Option<&str>,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if task.is_none() && due_at.is_none() {
            return Err(ReminderVaultError::Validation(
                "nothing to update: supply a task, a time, or both".to_string(),
            ));
        }
        let changes = ReminderChanges {
            encrypted_task: task
                .map(|text| self.session.encrypt(Field::Task, text.as_bytes()))
                .transpose()?,
            encrypted_time: due_at.map(|at| self.encrypt_time(at)).transpose()?,
            fired: due_at.map(|_| false),
        };

        let mut conn = self.conn().await?;
        let updated = diesel::update(reminders::table.find(id))
            .set(&changes)
            .execute(&mut conn)
            .await?;
        if updated == 0 {
            return Err(ReminderVaultError::NotFound(id));
        }
        tracing::debug!(
            reminder_id = id,
            task_changed = task.is_some(),
            time_changed = due_at.is_some(),
            "reminder updated"
        );
        Ok(())
    }

    pub async fn set_completed(&self, id: i32, completed: bool) -> Result<()> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(reminders::table.find(id))
            .set(reminders::completed.eq(completed))
            .execute(&mut conn)
            .await?;
        if updated == 0 {
            return Err(ReminderVaultError::NotFound(id));
        }
        Ok(())
    }

    pub async fn complete(&self, id: i32) -> Result<()> {
        self.set_completed(id, true).await
    }

    pub async fn reopen(&self, id: i32) -> Result<()> {
        self.set_completed(id, false).await
    }

    pub async fn delete(&self, id: i32) -> Result<()> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(reminders::table.find(id))
            .execute(&mut conn)
            .await?;
        if deleted == 0 {
            return Err(ReminderVaultError::NotFound(id));
        }
        tracing::debug!(reminder_id = id, "reminder deleted");
        Ok(())
    }

    pub async fn clear_all(&self) -> Result<usize> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(reminders::table)
            .execute(&mut conn)
            .await?;
        tracing::info!(count = deleted, "all reminders cleared");
        Ok(deleted)
    }

    /// Open, unfired reminders in creation order, time ciphertext only.
    pub async fn pending_alarms(&self) -> Result<Vec<PendingAlarm>> {
        let mut conn = self.conn().await?;
        let rows: Vec<(i32, i64, Vec<u8>)> = reminders::table
            .filter(reminders::completed.eq(false))
            .filter(reminders::fired.eq(false))
            .select((
                reminders::id,
                reminders::created_at,
                reminders::encrypted_time,
            ))
            .order((reminders::created_at.asc(), reminders::id.asc()))
            .load(&mut conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(id, created_at, encrypted_time)| PendingAlarm {
                id,
                created_at,
                encrypted_time,
            })
            .collect())
    }

    /// Sets `fired` only while the row still carries the exact time blob the
    /// caller decrypted, so a reschedule racing with the scan is kept armed.
    pub async fn mark_fired(&self, id: i32, expected_time_blob: &[u8]) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            reminders::table
                .filter(reminders::id.eq(id))
                .filter(reminders::fired.eq(false))
                .filter(reminders::completed.eq(false))
                .filter(reminders::encrypted_time.eq(expected_time_blob)),
        )
        .set(reminders::fired.eq(true))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    /// Case-insensitive substring match on task text. Decrypts every task.
    pub async fn find_by_task(&self, needle: &str, filter: ReminderFilter) -> Result<Vec<Reminder>> {
        let needle = Zeroizing::new(needle.trim().to_lowercase());
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let items = self.list_decrypted(filter).await?;
        Ok(items
            .into_iter()
            .filter(|item| {
                let haystack = Zeroizing::new(item.task.to_lowercase());
                haystack.contains(needle.as_str())
            })
            .collect())
    }

    pub fn decrypt_time(&self, blob: &[u8]) -> Result<DateTime<Utc>> {
        let text = self.session.decrypt_string(Field::Time, blob)?;
        DateTime::parse_from_rfc3339(text.as_str())
            .map(|at| at.with_timezone(&Utc))
            .map_err(|_| ReminderVaultError::StorageIo("stored due time is malformed".to_string()))
    }

    fn encrypt_time(&self, due_at: DateTime<Utc>) -> Result<Vec<u8>> {
        let text = Zeroizing::new(due_at.to_rfc3339_opts(SecondsFormat::AutoSi, true));
        self.session.encrypt(Field::Time, text.as_bytes())
    }

    fn decrypt_row(&self, row: ReminderRow) -> Result<Reminder> {
        let task = self.session.decrypt_string(Field::Task, &row.encrypted_task)?;
        let due_at = self.decrypt_time(&row.encrypted_time)?;
        Ok(Reminder {
            id: row.id,
            task: task.as_str().to_string(),
            due_at,
            completed: row.completed,
            fired: row.fired,
            created_at: row.created_at,
        })
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ReminderVaultError::StorageIo(e.to_string()))?;
        crate::db::apply_pragmas_async(&mut conn).await?;
        Ok(conn)
    }
}

fn filtered(filter: ReminderFilter) -> reminders::BoxedQuery<'static, diesel::sqlite::Sqlite> {
    let query = reminders::table.into_boxed();
    match filter {
        ReminderFilter::Open => query.filter(reminders::completed.eq(false)),
        ReminderFilter::Completed => query.filter(reminders::completed.eq(true)),
        ReminderFilter::All => query,
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

async fn run_migrations(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = crate::db::open_connection_sync(&database_url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| ReminderVaultError::StorageIo(e.to_string()))?;
        Ok::<_, ReminderVaultError>(())
    })
    .await
    .map_err(|e| ReminderVaultError::Runtime(e.to_string()))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{derive_key, generate_salt, FieldCipher, KdfParams};
    use chrono::TimeZone;

    async fn unlocked_store(dir: &tempfile::TempDir) -> ReminderStore {
        let session = Arc::new(KeySession::new());
        let salt = generate_salt().unwrap();
        let key = derive_key(b"pw", &salt, &KdfParams::light()).unwrap();
        session.install(FieldCipher::new(&key));
        let db_path = dir.path().join("reminders.db");
        ReminderStore::open(db_path.to_string_lossy(), session)
            .await
            .expect("store")
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, hour, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn create_and_read_back_both_fields() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = unlocked_store(&dir).await;

        let id = store.create("take medication", at(9, 0)).await.unwrap();
        let full = store.get_full(id).await.unwrap();
        assert_eq!(full.task.as_str(), "take medication");
        assert_eq!(full.due_at, at(9, 0));
        assert_eq!(store.get_time_only(id).await.unwrap(), at(9, 0));
    }

    #[tokio::test]
    async fn database_file_holds_no_plaintext() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = unlocked_store(&dir).await;
        store
            .create("water the ficus", at(7, 30))
            .await
            .unwrap();
        drop(store);

        let mut raw = std::fs::read(dir.path().join("reminders.db")).unwrap();
        if let Ok(wal) = std::fs::read(dir.path().join("reminders.db-wal")) {
            raw.extend_from_slice(&wal);
        }
        let needle = b"water the ficus";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
        let time_needle = b"2026-10-18T07:30";
        assert!(!raw.windows(time_needle.len()).any(|w| w == time_needle));
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_delete() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = unlocked_store(&dir).await;

        let first = store.create("a", at(8, 0)).await.unwrap();
        let second = store.create("b", at(8, 0)).await.unwrap();
        store.delete(second).await.unwrap();
        let third = store.create("c", at(8, 0)).await.unwrap();

        assert!(second > first);
        assert!(third > second);
    }

    #[tokio::test]
    async fn missing_ids_report_not_found() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = unlocked_store(&dir).await;

        assert!(matches!(
            store.get_full(42).await,
            Err(ReminderVaultError::NotFound(42))
        ));
        assert!(matches!(
            store.get_time_only(42).await,
            Err(ReminderVaultError::NotFound(42))
        ));
        assert!(matches!(
            store.delete(42).await,
            Err(ReminderVaultError::NotFound(42))
        ));
        assert!(matches!(
            store.update(42, Some("x"), None).await,
            Err(ReminderVaultError::NotFound(42))
        ));
    }

    #[tokio::test]
    async fn update_with_new_time_clears_fired() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = unlocked_store(&dir).await;
        let id = store.create("stretch", at(10, 0)).await.unwrap();

        let pending = store.pending_alarms().await.unwrap();
        assert!(store.mark_fired(id, &pending[0].encrypted_time).await.unwrap());
        assert!(store.summary(id).await.unwrap().fired);

        store.update(id, Some("stretch again"), None).await.unwrap();
        assert!(store.summary(id).await.unwrap().fired);

        store.update(id, None, Some(at(11, 0))).await.unwrap();
        assert!(!store.summary(id).await.unwrap().fired);
        let full = store.get_full(id).await.unwrap();
        assert_eq!(full.task.as_str(), "stretch again");
        assert_eq!(full.due_at, at(11, 0));
    }

    #[tokio::test]
    async fn mark_fired_refuses_a_rescheduled_row() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = unlocked_store(&dir).await;
        let id = store.create("call mom", at(12, 0)).await.unwrap();
        let stale = store.pending_alarms().await.unwrap()[0].encrypted_time.clone();

        store.update(id, None, Some(at(13, 0))).await.unwrap();
        assert!(!store.mark_fired(id, &stale).await.unwrap());
        assert!(!store.summary(id).await.unwrap().fired);
    }

    #[tokio::test]
    async fn corrupted_task_does_not_affect_time() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = unlocked_store(&dir).await;
        let id = store.create("pay rent", at(9, 15)).await.unwrap();

        let mut conn = store.conn().await.unwrap();
        diesel::update(reminders::table.find(id))
            .set(reminders::encrypted_task.eq(vec![1u8, 1, 0, 0, 0]))
            .execute(&mut conn)
            .await
            .unwrap();
        drop(conn);

        assert_eq!(store.get_time_only(id).await.unwrap(), at(9, 15));
        assert!(matches!(
            store.get_full(id).await,
            Err(ReminderVaultError::AuthenticationFailure)
        ));
    }

    #[tokio::test]
    async fn corrupted_time_does_not_affect_task() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = unlocked_store(&dir).await;
        let id = store.create("pay rent", at(9, 15)).await.unwrap();

        let mut conn = store.conn().await.unwrap();
        let mut blob: Vec<u8> = reminders::table
            .find(id)
            .select(reminders::encrypted_time)
            .first(&mut conn)
            .await
            .unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        diesel::update(reminders::table.find(id))
            .set(reminders::encrypted_time.eq(blob))
            .execute(&mut conn)
            .await
            .unwrap();
        let task_blob: Vec<u8> = reminders::table
            .find(id)
            .select(reminders::encrypted_task)
            .first(&mut conn)
            .await
            .unwrap();
        drop(conn);

        assert!(matches!(
            store.get_time_only(id).await,
            Err(ReminderVaultError::AuthenticationFailure)
        ));
        let task = store
            .session()
            .decrypt_string(Field::Task, &task_blob)
            .unwrap();
        assert_eq!(task.as_str(), "pay rent");
    }

    #[tokio::test]
    async fn listing_without_key_shows_only_bookkeeping() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = unlocked_store(&dir).await;
        let a = store.create("one", at(8, 0)).await.unwrap();
        let b = store.create("two", at(9, 0)).await.unwrap();
        store.set_completed(a, true).await.unwrap();

        store.session().lock();

        let open = store.list(ReminderFilter::Open).await.unwrap();
        assert_eq!(open.iter().map(|s| s.id).collect::<Vec<_>>(), vec![b]);
        assert_eq!(store.count(ReminderFilter::All).await.unwrap(), 2);
        assert_eq!(store.count_pending().await.unwrap(), 1);
        assert!(matches!(
            store.list_decrypted(ReminderFilter::All).await,
            Err(ReminderVaultError::AuthenticationFailure)
        ));
        assert!(matches!(
            store.get_full(b).await,
            Err(ReminderVaultError::AuthenticationFailure)
        ));
    }

    #[tokio::test]
    async fn decrypted_listing_follows_creation_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = unlocked_store(&dir).await;
        store.create("late", at(20, 0)).await.unwrap();
        store.create("early", at(6, 0)).await.unwrap();

        let items = store.list_decrypted(ReminderFilter::All).await.unwrap();
        let tasks: Vec<&str> = items.iter().map(|item| item.task.as_str()).collect();
        assert_eq!(tasks, vec!["late", "early"]);
    }

    #[tokio::test]
    async fn find_by_task_is_case_insensitive() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = unlocked_store(&dir).await;
        let id = store.create("Buy Milk", at(8, 0)).await.unwrap();
        store.create("walk dog", at(8, 0)).await.unwrap();

        let found = store
            .find_by_task("milk", ReminderFilter::Open)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert!(store
            .find_by_task("   ", ReminderFilter::All)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn clear_all_removes_everything() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = unlocked_store(&dir).await;
        store.create("one", at(8, 0)).await.unwrap();
        store.create("two", at(8, 0)).await.unwrap();

        assert_eq!(store.clear_all().await.unwrap(), 2);
        assert_eq!(store.count(ReminderFilter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn empty_update_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = unlocked_store(&dir).await;
        let id = store.create("one", at(8, 0)).await.unwrap();
        assert!(matches!(
            store.update(id, None, None).await,
            Err(ReminderVaultError::Validation(_))
        ));
    }
}
