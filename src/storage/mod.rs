//! `SQLite` persistence layer.
//!
//! One store per record family, each fronted by a trait so the chat and crawl
//! services can be exercised against in-memory fakes. All stores share the
//! same database file and create their own tables on construction.

pub mod assistants;
pub mod crawl;
pub mod messages;
pub mod users;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use assistants::{AssistantDirectoryStore, SqliteAssistantStore};
pub use crawl::{CrawlRecord, CrawlSite, CrawlSitePatch, CrawlStore, NewCrawlSite, SqliteCrawlStore};
pub use messages::{MessageStore, NewExchange, SqliteMessageStore};
pub use users::{SqliteUserStore, UserRecord, UserStore};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Storage layer error type.
#[derive(Debug, Error)]
pub enum StorageError {
    /// `SQLite` error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error for JSON columns.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A row held a value the domain type cannot represent.
    #[error("invalid row: {0}")]
    InvalidRow(String),
    /// A background persistence task was dropped before reporting back.
    #[error("background persistence task was interrupted")]
    Interrupted,
}

/// Convenience result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage configuration shared by all stores.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("nabi.sqlite"),
        }
    }
}
