//! Interval scheduler driving crawls of configured sites.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::crawl::{CrawlError, CrawlOutcome, CrawlService};
use crate::storage::{CrawlSite, CrawlStore};

/// Configuration for the crawl scheduler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks.
    pub tick_seconds: u64,
    /// Whether the scheduler runs at all.
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 60,
            enabled: true,
        }
    }
}

/// Whether a site's configured interval has elapsed. Sites never crawled
/// before are always due; inactive sites never are.
#[must_use]
pub fn is_due(site: &CrawlSite, now: DateTime<Utc>) -> bool {
    if !site.is_active {
        return false;
    }
    match site.last_crawled {
        None => true,
        Some(last) => {
            let elapsed = now.signed_duration_since(last);
            elapsed.num_minutes() >= site.interval_minutes
        }
    }
}

/// Background worker crawling due sites on a fixed tick.
pub struct CrawlScheduler {
    service: Arc<CrawlService>,
    store: Arc<dyn CrawlStore>,
    config: SchedulerConfig,
    shutdown: Arc<Notify>,
}

impl CrawlScheduler {
    /// Create a scheduler over the crawl service and store.
    #[must_use]
    pub fn new(
        service: Arc<CrawlService>,
        store: Arc<dyn CrawlStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            service,
            store,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a shutdown notifier to stop the scheduler.
    #[must_use]
    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn the scheduler as a tokio task.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the tick loop until shutdown is signaled.
    async fn run(&self) {
        if !self.config.enabled {
            info!("crawl scheduler is disabled");
            return;
        }

        let tick = Duration::from_secs(self.config.tick_seconds);
        info!(?tick, "starting crawl scheduler");

        loop {
            tokio::select! {
                () = tokio::time::sleep(tick) => {
                    if let Err(err) = self.run_once(Utc::now()).await {
                        warn!(error = %err, "scheduler tick failed");
                    }
                }
                () = self.shutdown.notified() => {
                    info!("crawl scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Run one tick: crawl every active site whose interval has elapsed.
    ///
    /// # Errors
    /// Returns an error only if the site listing fails; per-site crawl
    /// failures are logged and do not stop the tick.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<(), CrawlError> {
        let sites = self.store.list_active_sites().await?;

        for site in sites {
            if !is_due(&site, now) {
                debug!(site = site.id, "interval not elapsed, skipping");
                continue;
            }

            match self.service.crawl_site(&site).await {
                Ok(CrawlOutcome::Stored { new_posts }) => {
                    info!(site = site.id, new_posts, "scheduled crawl stored new posts");
                }
                Ok(outcome) => {
                    debug!(site = site.id, ?outcome, "scheduled crawl finished without new data");
                }
                Err(CrawlError::AlreadyCrawling(key)) => {
                    debug!(site = site.id, key, "crawl already in flight, skipping");
                }
                Err(err) => {
                    warn!(site = site.id, error = %err, "scheduled crawl failed");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::crawl::testing::{FakeFetcher, FakeReplier};
    use crate::storage::{NewCrawlSite, SqliteCrawlStore, StorageConfig};

    fn site_with(last_crawled: Option<DateTime<Utc>>, interval_minutes: i64, active: bool) -> CrawlSite {
        CrawlSite {
            id: 1,
            name: "board".to_string(),
            url: "https://example.com".to_string(),
            selector: ".board".to_string(),
            assistant_name: "parser".to_string(),
            interval_minutes,
            is_active: active,
            last_crawled,
        }
    }

    #[test]
    fn test_is_due_rules() {
        let now = Utc::now();

        assert!(is_due(&site_with(None, 10, true), now));
        assert!(!is_due(&site_with(None, 10, false), now));

        let recent = now - chrono::Duration::minutes(5);
        assert!(!is_due(&site_with(Some(recent), 10, true), now));

        let stale = now - chrono::Duration::minutes(10);
        assert!(is_due(&site_with(Some(stale), 10, true), now));
    }

    #[tokio::test]
    async fn test_second_tick_within_interval_skips_site() {
        let config = StorageConfig {
            sqlite_path: std::env::temp_dir().join(format!(
                "nabi_scheduler_{}.sqlite",
                uuid::Uuid::new_v4()
            )),
        };
        let store = Arc::new(SqliteCrawlStore::new(&config).await.unwrap());
        store
            .create_site(NewCrawlSite {
                name: "board".to_string(),
                url: "https://example.com/board".to_string(),
                selector: ".board".to_string(),
                assistant_name: "parser".to_string(),
                interval_minutes: 10,
                is_active: true,
            })
            .await
            .unwrap();

        let fetcher = Arc::new(FakeFetcher::with_content("board html"));
        let service = Arc::new(CrawlService::new(
            Arc::clone(&fetcher) as Arc<dyn crate::crawl::ContentFetcher>,
            Arc::new(FakeReplier::with_reply(r#"{"posts":[{"id":1}]}"#)),
            Arc::clone(&store) as Arc<dyn CrawlStore>,
        ));
        let scheduler = CrawlScheduler::new(
            service,
            Arc::clone(&store) as Arc<dyn CrawlStore>,
            SchedulerConfig::default(),
        );

        let first_tick = Utc::now();
        scheduler.run_once(first_tick).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        let after_first = store.list_sites().await.unwrap()[0].last_crawled;
        assert!(after_first.is_some());

        // A minute later the interval has not elapsed: the site is skipped
        // and last_crawled stays put.
        let second_tick = first_tick + chrono::Duration::minutes(1);
        scheduler.run_once(second_tick).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        let after_second = store.list_sites().await.unwrap()[0].last_crawled;
        assert_eq!(after_first, after_second);
    }
}
