//! Chat user storage.

use chrono::{DateTime, TimeZone, Utc};
use tokio_rusqlite::Connection;

use crate::storage::{StorageConfig, StorageError, StorageResult, StoreFuture};

/// A chat user as known to the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    /// Internal numeric id.
    pub id: i64,
    /// Opaque identity supplied by the chat surface.
    pub platform_id: String,
    /// Display name at first sight.
    pub username: String,
    /// Whether conversation context is enabled for this user.
    pub context_enabled: bool,
    /// Most recent conversation identifier, if any.
    pub last_conversation_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last interaction timestamp.
    pub last_interaction: DateTime<Utc>,
}

/// User store trait.
pub trait UserStore: Send + Sync {
    /// Insert the user if absent and return the stored record. Existing rows
    /// are returned untouched.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn upsert(&self, platform_id: &str, username: &str) -> StoreFuture<'_, StorageResult<UserRecord>>;

    /// Find a user by platform identity.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_by_platform_id(
        &self,
        platform_id: &str,
    ) -> StoreFuture<'_, StorageResult<Option<UserRecord>>>;
}

/// `SQLite` implementation of the user store.
pub struct SqliteUserStore {
    conn: Connection,
}

impl SqliteUserStore {
    /// Initialize the user store.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> StorageResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS chat_users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    platform_id TEXT NOT NULL UNIQUE,
                    username TEXT NOT NULL,
                    context_enabled INTEGER NOT NULL DEFAULT 1,
                    last_conversation_id TEXT,
                    created_at INTEGER NOT NULL,
                    last_interaction INTEGER NOT NULL
                )",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

type UserRow = (i64, String, String, i64, Option<String>, i64, i64);

const USER_COLUMNS: &str =
    "id, platform_id, username, context_enabled, last_conversation_id, created_at, last_interaction";

fn read_user_row(row: &rusqlite::Row<'_>) -> Result<UserRow, rusqlite::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_record(row: UserRow) -> StorageResult<UserRecord> {
    let (id, platform_id, username, context_enabled, last_conversation_id, created, interacted) =
        row;
    let created_at = millis_to_utc(created)?;
    let last_interaction = millis_to_utc(interacted)?;
    Ok(UserRecord {
        id,
        platform_id,
        username,
        context_enabled: context_enabled != 0,
        last_conversation_id,
        created_at,
        last_interaction,
    })
}

pub(crate) fn millis_to_utc(millis: i64) -> StorageResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StorageError::InvalidRow(format!("invalid timestamp: {millis}")))
}

impl UserStore for SqliteUserStore {
    fn upsert(&self, platform_id: &str, username: &str) -> StoreFuture<'_, StorageResult<UserRecord>> {
        let platform_id = platform_id.to_string();
        let username = username.to_string();
        Box::pin(async move {
            let now = Utc::now().timestamp_millis();
            let row = self
                .conn
                .call(move |conn| {
                    // Insert-if-absent: a hit never overwrites existing fields.
                    conn.execute(
                        "INSERT INTO chat_users
                            (platform_id, username, context_enabled, created_at, last_interaction)
                         VALUES (?1, ?2, 1, ?3, ?3)
                         ON CONFLICT(platform_id) DO NOTHING",
                        rusqlite::params![platform_id, username, now],
                    )?;
                    let row = conn.query_row(
                        &format!("SELECT {USER_COLUMNS} FROM chat_users WHERE platform_id = ?1"),
                        rusqlite::params![platform_id],
                        read_user_row,
                    )?;
                    Ok(row)
                })
                .await?;

            into_record(row)
        })
    }

    fn find_by_platform_id(
        &self,
        platform_id: &str,
    ) -> StoreFuture<'_, StorageResult<Option<UserRecord>>> {
        let platform_id = platform_id.to_string();
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {USER_COLUMNS} FROM chat_users WHERE platform_id = ?1"
                    ))?;
                    let row = stmt
                        .query_row(rusqlite::params![platform_id], read_user_row)
                        .map(Some)
                        .or_else(|err| match err {
                            rusqlite::Error::QueryReturnedNoRows => Ok(None),
                            other => Err(other),
                        })?;
                    Ok(row)
                })
                .await?;

            row.map(into_record).transpose()
        })
    }
}
