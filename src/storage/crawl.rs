//! Crawl site and crawl record storage.

use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;

use crate::storage::users::millis_to_utc;
use crate::storage::{StorageConfig, StorageResult, StoreFuture};

/// A configured crawl target.
#[derive(Clone, Debug, serde::Serialize)]
pub struct CrawlSite {
    /// Internal numeric id.
    pub id: i64,
    /// Operator-facing label.
    pub name: String,
    /// Page URL to fetch.
    pub url: String,
    /// CSS selector extracting the content block.
    pub selector: String,
    /// Assistant used to structure the scraped content.
    pub assistant_name: String,
    /// Minimum minutes between crawls.
    pub interval_minutes: i64,
    /// Whether the scheduler considers this site.
    pub is_active: bool,
    /// When the site last produced stored data, if ever.
    pub last_crawled: Option<DateTime<Utc>>,
}

/// Fields for creating a crawl site.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct NewCrawlSite {
    /// Operator-facing label.
    pub name: String,
    /// Page URL to fetch.
    pub url: String,
    /// CSS selector extracting the content block.
    pub selector: String,
    /// Assistant used to structure the scraped content.
    pub assistant_name: String,
    /// Minimum minutes between crawls.
    pub interval_minutes: i64,
    /// Whether the scheduler considers this site.
    pub is_active: bool,
}

/// Partial update for a crawl site; `None` fields are left untouched.
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct CrawlSitePatch {
    /// New label.
    pub name: Option<String>,
    /// New URL.
    pub url: Option<String>,
    /// New selector.
    pub selector: Option<String>,
    /// New assistant name.
    pub assistant_name: Option<String>,
    /// New crawl interval in minutes.
    pub interval_minutes: Option<i64>,
    /// New active flag.
    pub is_active: Option<bool>,
}

/// One stored crawl result.
#[derive(Clone, Debug, serde::Serialize)]
pub struct CrawlRecord {
    /// Internal numeric id.
    pub id: i64,
    /// Owning crawl site.
    pub crawl_site_id: i64,
    /// Structured payload as produced by the assistant.
    pub payload: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Crawl store trait.
pub trait CrawlStore: Send + Sync {
    /// Create a crawl site and return the stored row.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn create_site(&self, site: NewCrawlSite) -> StoreFuture<'_, StorageResult<CrawlSite>>;

    /// List all crawl sites.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_sites(&self) -> StoreFuture<'_, StorageResult<Vec<CrawlSite>>>;

    /// List active crawl sites only.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_active_sites(&self) -> StoreFuture<'_, StorageResult<Vec<CrawlSite>>>;

    /// Find a crawl site by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_site(&self, id: i64) -> StoreFuture<'_, StorageResult<Option<CrawlSite>>>;

    /// Find a crawl site by assistant name and URL.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_site_by_target(
        &self,
        assistant_name: &str,
        url: &str,
    ) -> StoreFuture<'_, StorageResult<Option<CrawlSite>>>;

    /// Apply a partial update and return the updated row, if the site exists.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn update_site(
        &self,
        id: i64,
        patch: CrawlSitePatch,
    ) -> StoreFuture<'_, StorageResult<Option<CrawlSite>>>;

    /// Delete a crawl site. Returns whether a row was removed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn delete_site(&self, id: i64) -> StoreFuture<'_, StorageResult<bool>>;

    /// Advance a site's `last_crawled` marker.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn touch_last_crawled(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, StorageResult<()>>;

    /// Store a crawl record.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn insert_record(
        &self,
        crawl_site_id: i64,
        payload: serde_json::Value,
    ) -> StoreFuture<'_, StorageResult<()>>;

    /// Most recent record for a site, if any.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn latest_record(&self, crawl_site_id: i64)
    -> StoreFuture<'_, StorageResult<Option<CrawlRecord>>>;

    /// Records newest-first, optionally filtered by site.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_records(
        &self,
        crawl_site_id: Option<i64>,
    ) -> StoreFuture<'_, StorageResult<Vec<CrawlRecord>>>;
}

/// `SQLite` implementation of the crawl store.
pub struct SqliteCrawlStore {
    conn: Connection,
}

impl SqliteCrawlStore {
    /// Initialize the crawl store.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn new(config: &StorageConfig) -> StorageResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS crawl_sites (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    url TEXT NOT NULL,
                    selector TEXT NOT NULL,
                    assistant_name TEXT NOT NULL,
                    interval_minutes INTEGER NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    last_crawled INTEGER
                );
                CREATE TABLE IF NOT EXISTS crawl_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    crawl_site_id INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_crawl_records_site_created
                    ON crawl_records (crawl_site_id, created_at);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

type SiteRow = (i64, String, String, String, String, i64, i64, Option<i64>);

const SITE_COLUMNS: &str =
    "id, name, url, selector, assistant_name, interval_minutes, is_active, last_crawled";

fn read_site_row(row: &rusqlite::Row<'_>) -> Result<SiteRow, rusqlite::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn into_site(row: SiteRow) -> StorageResult<CrawlSite> {
    let (id, name, url, selector, assistant_name, interval_minutes, is_active, last_crawled) = row;
    let last_crawled = last_crawled.map(millis_to_utc).transpose()?;
    Ok(CrawlSite {
        id,
        name,
        url,
        selector,
        assistant_name,
        interval_minutes,
        is_active: is_active != 0,
        last_crawled,
    })
}

type RecordRow = (i64, i64, String, i64);

fn into_record(row: RecordRow) -> StorageResult<CrawlRecord> {
    let (id, crawl_site_id, payload, created_at) = row;
    Ok(CrawlRecord {
        id,
        crawl_site_id,
        payload: serde_json::from_str(&payload)?,
        created_at: millis_to_utc(created_at)?,
    })
}

impl SqliteCrawlStore {
    fn fetch_site_where(
        &self,
        clause: &'static str,
        params: Vec<Box<dyn rusqlite::ToSql + Send>>,
    ) -> StoreFuture<'_, StorageResult<Option<CrawlSite>>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {SITE_COLUMNS} FROM crawl_sites WHERE {clause}"
                    ))?;
                    let refs: Vec<&dyn rusqlite::ToSql> = params
                        .iter()
                        .map(|param| param.as_ref() as &dyn rusqlite::ToSql)
                        .collect();
                    let row = stmt
                        .query_row(refs.as_slice(), read_site_row)
                        .map(Some)
                        .or_else(|err| match err {
                            rusqlite::Error::QueryReturnedNoRows => Ok(None),
                            other => Err(other),
                        })?;
                    Ok(row)
                })
                .await?;
            row.map(into_site).transpose()
        })
    }

    fn fetch_sites_where(
        &self,
        clause: &'static str,
    ) -> StoreFuture<'_, StorageResult<Vec<CrawlSite>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {SITE_COLUMNS} FROM crawl_sites {clause} ORDER BY id"
                    ))?;
                    let rows = stmt
                        .query_map([], read_site_row)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            rows.into_iter().map(into_site).collect()
        })
    }
}

impl CrawlStore for SqliteCrawlStore {
    fn create_site(&self, site: NewCrawlSite) -> StoreFuture<'_, StorageResult<CrawlSite>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO crawl_sites
                            (name, url, selector, assistant_name, interval_minutes, is_active)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        rusqlite::params![
                            site.name,
                            site.url,
                            site.selector,
                            site.assistant_name,
                            site.interval_minutes,
                            i64::from(site.is_active)
                        ],
                    )?;
                    let id = conn.last_insert_rowid();
                    let row = conn.query_row(
                        &format!("SELECT {SITE_COLUMNS} FROM crawl_sites WHERE id = ?1"),
                        rusqlite::params![id],
                        read_site_row,
                    )?;
                    Ok(row)
                })
                .await?;
            into_site(row)
        })
    }

    fn list_sites(&self) -> StoreFuture<'_, StorageResult<Vec<CrawlSite>>> {
        self.fetch_sites_where("")
    }

    fn list_active_sites(&self) -> StoreFuture<'_, StorageResult<Vec<CrawlSite>>> {
        self.fetch_sites_where("WHERE is_active = 1")
    }

    fn find_site(&self, id: i64) -> StoreFuture<'_, StorageResult<Option<CrawlSite>>> {
        self.fetch_site_where("id = ?1", vec![Box::new(id)])
    }

    fn find_site_by_target(
        &self,
        assistant_name: &str,
        url: &str,
    ) -> StoreFuture<'_, StorageResult<Option<CrawlSite>>> {
        self.fetch_site_where(
            "assistant_name = ?1 AND url = ?2",
            vec![
                Box::new(assistant_name.to_string()),
                Box::new(url.to_string()),
            ],
        )
    }

    fn update_site(
        &self,
        id: i64,
        patch: CrawlSitePatch,
    ) -> StoreFuture<'_, StorageResult<Option<CrawlSite>>> {
        Box::pin(async move {
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "UPDATE crawl_sites SET
                            name = COALESCE(?1, name),
                            url = COALESCE(?2, url),
                            selector = COALESCE(?3, selector),
                            assistant_name = COALESCE(?4, assistant_name),
                            interval_minutes = COALESCE(?5, interval_minutes),
                            is_active = COALESCE(?6, is_active)
                         WHERE id = ?7",
                        rusqlite::params![
                            patch.name,
                            patch.url,
                            patch.selector,
                            patch.assistant_name,
                            patch.interval_minutes,
                            patch.is_active.map(i64::from),
                            id
                        ],
                    )?;
                    Ok(())
                })
                .await?;
            self.find_site(id).await
        })
    }

    fn delete_site(&self, id: i64) -> StoreFuture<'_, StorageResult<bool>> {
        Box::pin(async move {
            let removed = self
                .conn
                .call(move |conn| {
                    let removed =
                        conn.execute("DELETE FROM crawl_sites WHERE id = ?1", rusqlite::params![id])?;
                    Ok(removed > 0)
                })
                .await?;
            Ok(removed)
        })
    }

    fn touch_last_crawled(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let millis = at.timestamp_millis();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "UPDATE crawl_sites SET last_crawled = ?1 WHERE id = ?2",
                        rusqlite::params![millis, id],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn insert_record(
        &self,
        crawl_site_id: i64,
        payload: serde_json::Value,
    ) -> StoreFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            let payload = serde_json::to_string(&payload)?;
            let now = Utc::now().timestamp_millis();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO crawl_records (crawl_site_id, payload, created_at)
                         VALUES (?1, ?2, ?3)",
                        rusqlite::params![crawl_site_id, payload, now],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn latest_record(
        &self,
        crawl_site_id: i64,
    ) -> StoreFuture<'_, StorageResult<Option<CrawlRecord>>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT id, crawl_site_id, payload, created_at FROM crawl_records
                         WHERE crawl_site_id = ?1
                         ORDER BY created_at DESC, id DESC
                         LIMIT 1",
                    )?;
                    let row: Option<RecordRow> = stmt
                        .query_row(rusqlite::params![crawl_site_id], |row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                        })
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

    fn list_records(
        &self,
        crawl_site_id: Option<i64>,
    ) -> StoreFuture<'_, StorageResult<Vec<CrawlRecord>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let read = |row: &rusqlite::Row<'_>| -> Result<RecordRow, rusqlite::Error> {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    };
                    let rows = match crawl_site_id {
                        Some(id) => {
                            let mut stmt = conn.prepare(
                                "SELECT id, crawl_site_id, payload, created_at FROM crawl_records
                                 WHERE crawl_site_id = ?1
                                 ORDER BY created_at DESC, id DESC",
                            )?;
                            stmt.query_map(rusqlite::params![id], read)?
                                .collect::<Result<Vec<RecordRow>, rusqlite::Error>>()?
                        }
                        None => {
                            let mut stmt = conn.prepare(
                                "SELECT id, crawl_site_id, payload, created_at FROM crawl_records
                                 ORDER BY created_at DESC, id DESC",
                            )?;
                            stmt.query_map([], read)?
                                .collect::<Result<Vec<RecordRow>, rusqlite::Error>>()?
                        }
                    };
                    Ok(rows)
                })
                .await?;
            rows.into_iter().map(into_record).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(tag: &str) -> SqliteCrawlStore {
        let config = StorageConfig {
            sqlite_path: std::env::temp_dir().join(format!(
                "nabi_crawl_{tag}_{}.sqlite",
                uuid::Uuid::new_v4()
            )),
        };
        SqliteCrawlStore::new(&config).await.unwrap()
    }

    fn new_site(name: &str) -> NewCrawlSite {
        NewCrawlSite {
            name: name.to_string(),
            url: format!("https://example.com/{name}"),
            selector: ".board".to_string(),
            assistant_name: "board-parser".to_string(),
            interval_minutes: 10,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_site_crud_roundtrip() {
        let store = store("crud").await;

        let created = store.create_site(new_site("alpha")).await.unwrap();
        assert!(created.last_crawled.is_none());

        let patch = CrawlSitePatch {
            interval_minutes: Some(30),
            is_active: Some(false),
            ..CrawlSitePatch::default()
        };
        let updated = store.update_site(created.id, patch).await.unwrap().unwrap();
        assert_eq!(updated.interval_minutes, 30);
        assert!(!updated.is_active);
        assert_eq!(updated.name, "alpha");

        assert!(store.list_active_sites().await.unwrap().is_empty());
        assert_eq!(store.list_sites().await.unwrap().len(), 1);

        assert!(store.delete_site(created.id).await.unwrap());
        assert!(store.find_site(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_latest_record_orders_by_recency() {
        let store = store("records").await;
        let site = store.create_site(new_site("beta")).await.unwrap();

        store
            .insert_record(site.id, serde_json::json!({"posts": [{"id": 1}]}))
            .await
            .unwrap();
        store
            .insert_record(site.id, serde_json::json!({"posts": [{"id": 2}]}))
            .await
            .unwrap();

        let latest = store.latest_record(site.id).await.unwrap().unwrap();
        assert_eq!(latest.payload["posts"][0]["id"], 2);
        assert_eq!(store.list_records(Some(site.id)).await.unwrap().len(), 2);
    }
}
