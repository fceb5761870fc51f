use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;

use crate::error::{ReminderVaultError, Result};

pub type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;

const BUSY_TIMEOUT_PRAGMA: &str = "PRAGMA busy_timeout = 5000";
const JOURNAL_MODE_PRAGMA: &str = "PRAGMA journal_mode = WAL";
const SECURE_DELETE_PRAGMA: &str = "PRAGMA secure_delete = ON";

fn storage_err(err: impl std::fmt::Display) -> ReminderVaultError {
    ReminderVaultError::StorageIo(err.to_string())
}

pub fn open_connection_sync(database_url: &str) -> Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(database_url).map_err(storage_err)?;
    apply_pragmas_sync(&mut conn)?;
    Ok(conn)
}

pub fn apply_pragmas_sync(conn: &mut SqliteConnection) -> Result<()> {
    diesel::RunQueryDsl::execute(diesel::sql_query(BUSY_TIMEOUT_PRAGMA), conn)
        .map_err(storage_err)?;
    diesel::RunQueryDsl::execute(diesel::sql_query(SECURE_DELETE_PRAGMA), conn)
        .map_err(storage_err)?;
    // WAL is best-effort; some filesystems refuse it.
    if let Err(err) = diesel::connection::SimpleConnection::batch_execute(conn, JOURNAL_MODE_PRAGMA)
    {
        tracing::debug!("Unable to switch journal mode to WAL: {}", err);
    }
    Ok(())
}

pub async fn apply_pragmas_async(conn: &mut SqliteAsyncConn) -> Result<()> {
    diesel_async::RunQueryDsl::execute(diesel::sql_query(BUSY_TIMEOUT_PRAGMA), conn)
        .await
        .map_err(storage_err)?;
    diesel_async::RunQueryDsl::execute(diesel::sql_query(SECURE_DELETE_PRAGMA), conn)
        .await
        .map_err(storage_err)?;
    Ok(())
}
