pub mod config;
pub mod daemon;
pub mod import;
pub mod preview;
pub mod run;
pub mod source;

use std::sync::Arc;

use anyhow::Result;
use feedsync_core::publisher::HttpPublisher;
use feedsync_core::store::FileStore;
use feedsync_core::{FeedSyncConfig, HttpFeedFetcher};

pub async fn open_store(config: &FeedSyncConfig) -> Result<Arc<FileStore>> {
    Ok(Arc::new(FileStore::open(&config.data_path()).await?))
}

pub fn publisher(config: &FeedSyncConfig) -> Result<Arc<HttpPublisher>> {
    Ok(Arc::new(HttpPublisher::from_config(&config.publisher)?))
}

pub fn fetcher(config: &FeedSyncConfig) -> Result<Arc<HttpFeedFetcher>> {
    Ok(Arc::new(HttpFeedFetcher::new(&config.fetch)?))
}
