//! The remote calendar service events are published to.

mod http;
mod memory;
pub mod protocol;

pub use http::HttpPublisher;
pub use memory::InMemoryPublisher;

use crate::error::FeedSyncResult;
use crate::materialized::RemoteEventRef;
use crate::metadata::PublishedEvent;
use crate::source::GroupId;

#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    /// Groups events can currently be attributed to.
    async fn list_groups(&self) -> FeedSyncResult<Vec<GroupId>>;
    async fn create_event(&self, event: &PublishedEvent) -> FeedSyncResult<RemoteEventRef>;
    async fn delete_event(&self, remote: &RemoteEventRef) -> FeedSyncResult<()>;
}
