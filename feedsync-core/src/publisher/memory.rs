use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::Publisher;
use crate::error::{FeedSyncError, FeedSyncResult};
use crate::materialized::RemoteEventRef;
use crate::metadata::PublishedEvent;
use crate::source::GroupId;

#[derive(Debug, Default)]
struct Recorded {
    created: Vec<(RemoteEventRef, PublishedEvent)>,
    deleted: Vec<RemoteEventRef>,
}

/// Publisher that keeps everything in memory.
///
/// Used for dry runs and tests. Creates can be made to fail by event title,
/// deletes by remote id, and group listing altogether.
#[derive(Debug, Default)]
pub struct InMemoryPublisher {
    groups: Vec<GroupId>,
    failing_titles: HashSet<String>,
    failing_deletes: HashSet<String>,
    groups_unavailable: bool,
    next_id: AtomicU64,
    recorded: Mutex<Recorded>,
}

impl InMemoryPublisher {
    pub fn with_groups(groups: impl IntoIterator<Item = GroupId>) -> Self {
        InMemoryPublisher {
            groups: groups.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn fail_creates_titled(mut self, title: &str) -> Self {
        self.failing_titles.insert(title.to_string());
        self
    }

    pub fn fail_deletes_of(mut self, remote_id: &str) -> Self {
        self.failing_deletes.insert(remote_id.to_string());
        self
    }

    pub fn without_group_listing(mut self) -> Self {
        self.groups_unavailable = true;
        self
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn created(&self) -> Vec<(RemoteEventRef, PublishedEvent)> {
        self.recorded().created.clone()
    }

    pub fn created_titles(&self) -> Vec<String> {
        self.recorded()
            .created
            .iter()
            .map(|(_, event)| event.title.clone())
            .collect()
    }

    pub fn deleted(&self) -> Vec<RemoteEventRef> {
        self.recorded().deleted.clone()
    }
}

#[async_trait::async_trait]
impl Publisher for InMemoryPublisher {
    async fn list_groups(&self) -> FeedSyncResult<Vec<GroupId>> {
        if self.groups_unavailable {
            return Err(FeedSyncError::Publisher("group listing unavailable".into()));
        }
        Ok(self.groups.clone())
    }

    async fn create_event(&self, event: &PublishedEvent) -> FeedSyncResult<RemoteEventRef> {
        if self.failing_titles.contains(&event.title) {
            return Err(FeedSyncError::Publisher(format!(
                "rejected event '{}'",
                event.title
            )));
        }
        if !self.groups.contains(&event.attributed_to_id) {
            return Err(FeedSyncError::GroupNotFound(event.attributed_to_id.clone()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let remote = RemoteEventRef {
            id: id.to_string(),
            uuid: Some(uuid::Uuid::new_v4().to_string()),
        };
        self.recorded().created.push((remote.clone(), event.clone()));
        Ok(remote)
    }

    async fn delete_event(&self, remote: &RemoteEventRef) -> FeedSyncResult<()> {
        if self.failing_deletes.contains(&remote.id) {
            return Err(FeedSyncError::Publisher(format!(
                "could not delete event {}",
                remote.id
            )));
        }
        self.recorded().deleted.push(remote.clone());
        Ok(())
    }
}
