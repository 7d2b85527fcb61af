//! Persistence of feed sources and materialized events.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::InMemoryStore;

use serde::{Deserialize, Serialize};

use crate::error::{FeedSyncError, FeedSyncResult};
use crate::materialized::MaterializedEvent;
use crate::occurrence::OccurrenceId;
use crate::source::{FeedSource, SourceId};

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Active sources in registration order, one page at a time.
    async fn active_sources(&self, offset: usize, limit: usize) -> FeedSyncResult<Vec<FeedSource>>;
    async fn all_sources(&self) -> FeedSyncResult<Vec<FeedSource>>;
    async fn find_source(&self, id: &SourceId) -> FeedSyncResult<Option<FeedSource>>;
    /// Insert or replace by id.
    async fn save_source(&self, source: &FeedSource) -> FeedSyncResult<()>;
    async fn set_source_active(&self, id: &SourceId, active: bool) -> FeedSyncResult<()>;

    async fn materialized_events_for(&self, source_id: &SourceId) -> FeedSyncResult<Vec<MaterializedEvent>>;
    /// Global lookup across every source and upload.
    async fn find_materialized(&self, occurrence_id: &OccurrenceId) -> FeedSyncResult<Option<MaterializedEvent>>;
    async fn materialized_ids(&self) -> FeedSyncResult<Vec<OccurrenceId>>;
    /// Fails when a record with the same occurrence id exists.
    async fn create_materialized(&self, event: &MaterializedEvent) -> FeedSyncResult<()>;
    /// Returns whether a record was removed.
    async fn delete_materialized(&self, occurrence_id: &OccurrenceId) -> FeedSyncResult<bool>;

    /// Pick up changes other processes made since this store was opened.
    async fn reload(&self) -> FeedSyncResult<()> {
        Ok(())
    }
}

/// Everything a store holds. Shared by both implementations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreData {
    #[serde(default)]
    pub sources: Vec<FeedSource>,
    #[serde(default)]
    pub events: Vec<MaterializedEvent>,
}

impl StoreData {
    fn active_sources(&self, offset: usize, limit: usize) -> Vec<FeedSource> {
        self.sources
            .iter()
            .filter(|s| s.active)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    fn find_source(&self, id: &SourceId) -> Option<FeedSource> {
        self.sources.iter().find(|s| &s.id == id).cloned()
    }

    fn save_source(&mut self, source: &FeedSource) {
        match self.sources.iter_mut().find(|s| s.id == source.id) {
            Some(existing) => *existing = source.clone(),
            None => self.sources.push(source.clone()),
        }
    }

    fn set_source_active(&mut self, id: &SourceId, active: bool) -> FeedSyncResult<()> {
        let source = self
            .sources
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| FeedSyncError::SourceNotFound(id.clone()))?;
        source.active = active;
        Ok(())
    }

    fn materialized_events_for(&self, source_id: &SourceId) -> Vec<MaterializedEvent> {
        self.events
            .iter()
            .filter(|e| e.belongs_to(source_id))
            .cloned()
            .collect()
    }

    fn find_materialized(&self, occurrence_id: &OccurrenceId) -> Option<MaterializedEvent> {
        self.events
            .iter()
            .find(|e| &e.occurrence_id == occurrence_id)
            .cloned()
    }

    fn materialized_ids(&self) -> Vec<OccurrenceId> {
        self.events.iter().map(|e| e.occurrence_id.clone()).collect()
    }

    fn create_materialized(&mut self, event: &MaterializedEvent) -> FeedSyncResult<()> {
        if self.events.iter().any(|e| e.occurrence_id == event.occurrence_id) {
            return Err(FeedSyncError::Storage(format!(
                "materialized event '{}' already exists",
                event.occurrence_id
            )));
        }
        self.events.push(event.clone());
        Ok(())
    }

    fn delete_materialized(&mut self, occurrence_id: &OccurrenceId) -> bool {
        let before = self.events.len();
        self.events.retain(|e| &e.occurrence_id != occurrence_id);
        self.events.len() != before
    }
}
