use std::sync::{Mutex, MutexGuard};

use super::{Store, StoreData};
use crate::error::FeedSyncResult;
use crate::materialized::MaterializedEvent;
use crate::occurrence::OccurrenceId;
use crate::source::{FeedSource, SourceId};

/// Process-local store for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: Mutex<StoreData>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(sources: Vec<FeedSource>) -> Self {
        InMemoryStore {
            data: Mutex::new(StoreData {
                sources,
                events: Vec::new(),
            }),
        }
    }

    /// Copy of everything in another store's snapshot, e.g. to dry-run against real data.
    pub fn seeded(sources: Vec<FeedSource>, events: Vec<MaterializedEvent>) -> Self {
        InMemoryStore {
            data: Mutex::new(StoreData { sources, events }),
        }
    }

    fn data(&self) -> MutexGuard<'_, StoreData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
    async fn active_sources(&self, offset: usize, limit: usize) -> FeedSyncResult<Vec<FeedSource>> {
        Ok(self.data().active_sources(offset, limit))
    }

    async fn all_sources(&self) -> FeedSyncResult<Vec<FeedSource>> {
        Ok(self.data().sources.clone())
    }

    async fn find_source(&self, id: &SourceId) -> FeedSyncResult<Option<FeedSource>> {
        Ok(self.data().find_source(id))
    }

    async fn save_source(&self, source: &FeedSource) -> FeedSyncResult<()> {
        self.data().save_source(source);
        Ok(())
    }

    async fn set_source_active(&self, id: &SourceId, active: bool) -> FeedSyncResult<()> {
        self.data().set_source_active(id, active)
    }

    async fn materialized_events_for(&self, source_id: &SourceId) -> FeedSyncResult<Vec<MaterializedEvent>> {
        Ok(self.data().materialized_events_for(source_id))
    }

    async fn find_materialized(&self, occurrence_id: &OccurrenceId) -> FeedSyncResult<Option<MaterializedEvent>> {
        Ok(self.data().find_materialized(occurrence_id))
    }

    async fn materialized_ids(&self) -> FeedSyncResult<Vec<OccurrenceId>> {
        Ok(self.data().materialized_ids())
    }

    async fn create_materialized(&self, event: &MaterializedEvent) -> FeedSyncResult<()> {
        self.data().create_materialized(event)
    }

    async fn delete_materialized(&self, occurrence_id: &OccurrenceId) -> FeedSyncResult<bool> {
        Ok(self.data().delete_materialized(occurrence_id))
    }
}
