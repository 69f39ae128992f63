//! Chat message storage and exchange bookkeeping.

use chrono::Utc;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::storage::{StorageConfig, StorageResult, StoreFuture};

/// One user turn and its bot reply, persisted together.
#[derive(Clone, Debug)]
pub struct NewExchange {
    /// Internal id of the user who sent the message.
    pub user_id: i64,
    /// Correlation id shared by the pair.
    pub exchange_id: Uuid,
    /// The user's message content.
    pub user_message: String,
    /// The assistant's reply content.
    pub bot_reply: String,
    /// Provider-minted conversation identifier, when known.
    pub conversation_id: Option<String>,
}

/// Message store trait.
pub trait MessageStore: Send + Sync {
    /// Persist an exchange: both messages plus the user's `last_interaction`
    /// and `last_conversation_id`, all-or-nothing.
    ///
    /// # Errors
    /// Returns an error if the transaction fails; no partial rows survive.
    fn record_exchange(&self, exchange: NewExchange) -> StoreFuture<'_, StorageResult<()>>;

    /// Conversation id of the newest non-deleted message for a user, if any.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn latest_conversation(&self, user_id: i64) -> StoreFuture<'_, StorageResult<Option<String>>>;

    /// Soft-delete every message of a user and clear the stored conversation
    /// pointer, as one transaction. Returns the number of messages touched.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    fn mark_all_deleted(&self, user_id: i64) -> StoreFuture<'_, StorageResult<u64>>;
}

/// `SQLite` implementation of the message store.
pub struct SqliteMessageStore {
    conn: Connection,
}

impl SqliteMessageStore {
    /// Initialize the message store.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> StorageResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS chat_messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    is_bot_message INTEGER NOT NULL,
                    is_deleted INTEGER NOT NULL DEFAULT 0,
                    ts INTEGER NOT NULL,
                    conversation_id TEXT,
                    exchange_id TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_chat_messages_user_ts
                    ON chat_messages (user_id, ts);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_chat_messages_exchange_side
                    ON chat_messages (exchange_id, is_bot_message);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

impl MessageStore for SqliteMessageStore {
    fn record_exchange(&self, exchange: NewExchange) -> StoreFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let now = Utc::now().timestamp_millis();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    {
                        let mut stmt = tx.prepare(
                            "INSERT INTO chat_messages
                                (user_id, content, is_bot_message, is_deleted, ts,
                                 conversation_id, exchange_id)
                             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6)",
                        )?;
                        let exchange_id = exchange.exchange_id.to_string();
                        stmt.execute(rusqlite::params![
                            exchange.user_id,
                            exchange.user_message,
                            0,
                            now,
                            exchange.conversation_id,
                            exchange_id
                        ])?;
                        stmt.execute(rusqlite::params![
                            exchange.user_id,
                            exchange.bot_reply,
                            1,
                            now,
                            exchange.conversation_id,
                            exchange_id
                        ])?;
                    }
                    tx.execute(
                        "UPDATE chat_users
                         SET last_interaction = ?1, last_conversation_id = ?2
                         WHERE id = ?3",
                        rusqlite::params![now, exchange.conversation_id, exchange.user_id],
                    )?;
                    tx.commit()?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn latest_conversation(&self, user_id: i64) -> StoreFuture<'_, StorageResult<Option<String>>> {
        Box::pin(async move {
            let conversation = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT conversation_id FROM chat_messages
                         WHERE user_id = ?1 AND is_deleted = 0
                         ORDER BY ts DESC, id DESC
                         LIMIT 1",
                    )?;
                    let row: Option<Option<String>> = stmt
                        .query_row(rusqlite::params![user_id], |row| row.get(0))
                        .map(Some)
                        .or_else(|err| match err {
                            rusqlite::Error::QueryReturnedNoRows => Ok(None),
                            other => Err(other),
                        })?;
                    Ok(row.flatten())
                })
                .await?;
            Ok(conversation)
        })
    }

    fn mark_all_deleted(&self, user_id: i64) -> StoreFuture<'_, StorageResult<u64>> {
        Box::pin(async move {
            let touched = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let touched = tx.execute(
                        "UPDATE chat_messages SET is_deleted = 1 WHERE user_id = ?1",
                        rusqlite::params![user_id],
                    )?;
                    tx.execute(
                        "UPDATE chat_users SET last_conversation_id = NULL WHERE id = ?1",
                        rusqlite::params![user_id],
                    )?;
                    tx.commit()?;
                    Ok(touched as u64)
                })
                .await?;
            Ok(touched)
        })
    }
}
