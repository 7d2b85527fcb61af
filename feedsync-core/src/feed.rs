//! Fetching feed documents from URLs and local files.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::config::FetchConfig;
use crate::error::{FeedSyncError, FeedSyncResult};

const BOM: char = '\u{feff}';

#[async_trait::async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the document at `location` as text.
    async fn fetch(&self, location: &str) -> FeedSyncResult<String>;
}

/// Where a location string points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedLocation {
    Remote(Url),
    Local(PathBuf),
}

impl FeedLocation {
    /// `http(s)://` and `webcal(s)://` are remote (webcal becomes https),
    /// `file://` and anything without a scheme is a local path.
    pub fn parse(location: &str) -> FeedSyncResult<Self> {
        let location = location.trim();
        let unreachable = |reason: String| FeedSyncError::FeedUnreachable {
            url: location.to_string(),
            reason,
        };

        let Ok(url) = Url::parse(location) else {
            return Ok(FeedLocation::Local(PathBuf::from(location)));
        };

        match url.scheme() {
            "http" | "https" => Ok(FeedLocation::Remote(url)),
            "webcal" | "webcals" => {
                let rewritten = format!("https{}", &location[url.scheme().len()..]);
                Url::parse(&rewritten)
                    .map(FeedLocation::Remote)
                    .map_err(|e| unreachable(e.to_string()))
            }
            "file" => url
                .to_file_path()
                .map(FeedLocation::Local)
                .map_err(|_| unreachable("invalid file URL".into())),
            // Windows drive letters parse as a one-letter scheme
            scheme if scheme.len() == 1 => Ok(FeedLocation::Local(PathBuf::from(location))),
            scheme => Err(unreachable(format!("unsupported scheme '{scheme}'"))),
        }
    }
}

/// Decode a fetched body, rejecting anything that is not UTF-8.
fn decode(location: &str, bytes: Vec<u8>) -> FeedSyncResult<String> {
    let text = String::from_utf8(bytes).map_err(|_| FeedSyncError::FeedEncoding(location.to_string()))?;
    Ok(match text.strip_prefix(BOM) {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

enum Attempt {
    Done(Vec<u8>),
    Retry(String),
    Fail(String),
}

/// Fetches over HTTP with a per-attempt timeout and a bounded number of
/// retries for transient failures. Local paths are read from disk.
#[derive(Debug, Clone)]
pub struct HttpFeedFetcher {
    http: reqwest::Client,
    timeout: Duration,
    retries: u32,
    retry_backoff: Duration,
}

impl HttpFeedFetcher {
    pub fn new(config: &FetchConfig) -> FeedSyncResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("feedsync/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FeedSyncError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(HttpFeedFetcher {
            http,
            timeout: config.timeout,
            retries: config.retries,
            retry_backoff: config.retry_backoff,
        })
    }

    async fn attempt(&self, url: &Url) -> Attempt {
        let resp = match self.http.get(url.clone()).timeout(self.timeout).send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                return Attempt::Retry(e.to_string());
            }
            Err(e) => return Attempt::Fail(e.to_string()),
        };

        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Attempt::Retry(format!("HTTP {status}"));
        }
        if !status.is_success() {
            return Attempt::Fail(format!("HTTP {status}"));
        }

        match resp.bytes().await {
            Ok(bytes) => Attempt::Done(bytes.to_vec()),
            Err(e) if e.is_timeout() => Attempt::Retry(e.to_string()),
            Err(e) => Attempt::Fail(e.to_string()),
        }
    }

    async fn fetch_remote(&self, location: &str, url: &Url) -> FeedSyncResult<Vec<u8>> {
        let mut attempt = 0;
        loop {
            let reason = match self.attempt(url).await {
                Attempt::Done(bytes) => return Ok(bytes),
                Attempt::Fail(reason) => reason,
                Attempt::Retry(reason) if attempt < self.retries => {
                    attempt += 1;
                    tracing::debug!(url = %url, attempt, reason, "retrying feed fetch");
                    tokio::time::sleep(self.retry_backoff).await;
                    continue;
                }
                Attempt::Retry(reason) => reason,
            };

            return Err(FeedSyncError::FeedUnreachable {
                url: location.to_string(),
                reason,
            });
        }
    }
}

#[async_trait::async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, location: &str) -> FeedSyncResult<String> {
        let bytes = match FeedLocation::parse(location)? {
            FeedLocation::Remote(url) => self.fetch_remote(location, &url).await?,
            FeedLocation::Local(path) => {
                tokio::fs::read(&path)
                    .await
                    .map_err(|e| FeedSyncError::FeedUnreachable {
                        url: location.to_string(),
                        reason: e.to_string(),
                    })?
            }
        };

        decode(location, bytes)
    }
}

/// Documents held in memory, keyed by location.
#[derive(Debug, Clone, Default)]
pub struct StaticFeeds {
    feeds: HashMap<String, String>,
}

impl StaticFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, location: &str, content: &str) -> Self {
        self.insert(location, content);
        self
    }

    pub fn insert(&mut self, location: &str, content: &str) {
        self.feeds.insert(location.to_string(), content.to_string());
    }
}

#[async_trait::async_trait]
impl FeedFetcher for StaticFeeds {
    async fn fetch(&self, location: &str) -> FeedSyncResult<String> {
        self.feeds
            .get(location)
            .cloned()
            .ok_or_else(|| FeedSyncError::FeedUnreachable {
                url: location.to_string(),
                reason: "not found".into(),
            })
    }
}
