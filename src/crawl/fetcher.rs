//! Best-effort page fetching with CSS-selector extraction.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crawl::CrawlError;

/// Page-fetching capability used by the crawl pipeline.
///
/// Best-effort by contract: every failure mode (network, non-HTML payload,
/// invalid selector, no match, empty text) yields `None`, never an error.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch `url` and return the trimmed text of the first element matching
    /// `selector`, or `None`.
    async fn fetch(&self, url: &str, selector: &str) -> Option<String>;
}

/// Configuration for the page fetcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
    /// Connection timeout in seconds.
    pub connect_timeout_seconds: u64,
    /// Maximum body size to download, in bytes.
    pub max_content_length: usize,
    /// User agents to rotate.
    pub user_agents: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            connect_timeout_seconds: 10,
            max_content_length: 10 * 1024 * 1024,
            user_agents: default_user_agents(),
        }
    }
}

impl FetchConfig {
    /// Get a random user agent from the rotation list.
    #[must_use]
    pub fn random_user_agent(&self) -> String {
        if self.user_agents.is_empty() {
            return default_user_agents()[0].clone();
        }
        let mut rng = rand::thread_rng();
        let idx = rng.gen_range(0..self.user_agents.len());
        self.user_agents[idx].clone()
    }
}

fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
    ]
}

/// Reqwest-backed page fetcher.
pub struct PageFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl PageFetcher {
    /// Create a fetcher with the given configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: FetchConfig) -> Result<Self, CrawlError> {
        use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};

        let mut headers = HeaderMap::new();
        let ua = config.random_user_agent();
        if let Ok(value) = HeaderValue::from_str(&ua) {
            headers.insert(USER_AGENT, value);
        }
        if let Ok(value) = HeaderValue::from_str(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ) {
            headers.insert(ACCEPT, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|err| CrawlError::Client(err.to_string()))?;

        Ok(Self { client, config })
    }

    /// Create a fetcher with default configuration.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_defaults() -> Result<Self, CrawlError> {
        Self::new(FetchConfig::default())
    }
}

#[async_trait]
impl ContentFetcher for PageFetcher {
    async fn fetch(&self, url: &str, selector: &str) -> Option<String> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(url, error = %err, "page fetch failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(url, status = %response.status(), "page fetch returned non-success");
            return None;
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.config.max_content_length {
                warn!(url, length, "page body too large, skipping");
                return None;
            }
        }

        let html = match response.text().await {
            Ok(html) => html,
            Err(err) => {
                warn!(url, error = %err, "page body read failed");
                return None;
            }
        };

        extract_first_match(&html, selector).map_or_else(
            || {
                debug!(url, selector, "selector matched nothing");
                None
            },
            Some,
        )
    }
}

/// Extract the trimmed, whitespace-collapsed text of the first element
/// matching `selector`.
fn extract_first_match(html: &str, selector: &str) -> Option<String> {
    let Ok(parsed_selector) = Selector::parse(selector) else {
        warn!(selector, "invalid css selector");
        return None;
    };

    let document = Html::parse_document(html);
    let element = document.select(&parsed_selector).next()?;
    let text = element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if text.is_empty() { None } else { Some(text) }
}
