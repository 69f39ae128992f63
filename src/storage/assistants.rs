//! Assistant directory storage: human-chosen name to provider-side id.

use tokio_rusqlite::Connection;

use crate::storage::{StorageConfig, StorageResult, StoreFuture};

/// Assistant directory store trait.
pub trait AssistantDirectoryStore: Send + Sync {
    /// Look up the provider-side assistant id for a name.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_assistant_id(&self, name: &str) -> StoreFuture<'_, StorageResult<Option<String>>>;

    /// Register a name → assistant id mapping (replacing any previous one).
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn register(&self, name: &str, assistant_id: &str) -> StoreFuture<'_, StorageResult<()>>;
}

/// `SQLite` implementation of the assistant directory store.
pub struct SqliteAssistantStore {
    conn: Connection,
}

impl SqliteAssistantStore {
    /// Initialize the assistant directory store.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> StorageResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS assistant_directory (
                    name TEXT PRIMARY KEY,
                    assistant_id TEXT NOT NULL
                )",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

impl AssistantDirectoryStore for SqliteAssistantStore {
    fn find_assistant_id(&self, name: &str) -> StoreFuture<'_, StorageResult<Option<String>>> {
        let name = name.to_string();
        Box::pin(async move {
            let id = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT assistant_id FROM assistant_directory WHERE name = ?1",
                    )?;
                    let id: Option<String> = stmt
                        .query_row(rusqlite::params![name], |row| row.get(0))
                        .map(Some)
                        .or_else(|err| match err {
                            rusqlite::Error::QueryReturnedNoRows => Ok(None),
                            other => Err(other),
                        })?;
                    Ok(id)
                })
                .await?;
            Ok(id)
        })
    }

    fn register(&self, name: &str, assistant_id: &str) -> StoreFuture<'_, StorageResult<()>> {
        let name = name.to_string();
        let assistant_id = assistant_id.to_string();
        Box::pin(async move {
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT OR REPLACE INTO assistant_directory (name, assistant_id)
                         VALUES (?1, ?2)",
                        rusqlite::params![name, assistant_id],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_find() {
        let config = StorageConfig {
            sqlite_path: std::env::temp_dir().join(format!(
                "nabi_assistants_{}.sqlite",
                uuid::Uuid::new_v4()
            )),
        };
        let store = SqliteAssistantStore::new(&config).await.unwrap();

        assert!(store.find_assistant_id("helper").await.unwrap().is_none());

        store.register("helper", "asst_123").await.unwrap();
        let found = store.find_assistant_id("helper").await.unwrap();
        assert_eq!(found.as_deref(), Some("asst_123"));
    }
}
