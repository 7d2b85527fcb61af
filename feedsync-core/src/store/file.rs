use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{Store, StoreData};
use crate::error::{FeedSyncError, FeedSyncResult};
use crate::materialized::MaterializedEvent;
use crate::occurrence::OccurrenceId;
use crate::source::{FeedSource, SourceId};

const STATE_FILE: &str = "state.json";
const JOURNAL_FILE: &str = "state.journal";

/// Journal entries kept before they are folded into the state file.
const COMPACT_AFTER: usize = 200;

/// One mutation, as written to the journal.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    SaveSource { source: FeedSource },
    SetSourceActive { id: SourceId, active: bool },
    CreateMaterialized { event: MaterializedEvent },
    DeleteMaterialized { occurrence_id: OccurrenceId },
}

impl JournalEntry {
    /// Returns whether anything changed. Errors leave `data` untouched.
    fn apply(&self, data: &mut StoreData) -> FeedSyncResult<bool> {
        match self {
            JournalEntry::SaveSource { source } => {
                data.save_source(source);
                Ok(true)
            }
            JournalEntry::SetSourceActive { id, active } => {
                data.set_source_active(id, *active).map(|()| true)
            }
            JournalEntry::CreateMaterialized { event } => {
                data.create_materialized(event).map(|()| true)
            }
            JournalEntry::DeleteMaterialized { occurrence_id } => {
                Ok(data.delete_materialized(occurrence_id))
            }
        }
    }
}

struct State {
    data: StoreData,
    /// Entries in the journal file that the state file doesn't contain yet.
    journal_len: usize,
}

/// JSON state file plus an append-only journal under the data directory.
///
/// Every mutation appends one line to the journal and syncs it, so a record
/// is durable as soon as the call returns. Once the journal grows past
/// [`COMPACT_AFTER`] entries the whole state is written to the state file
/// (temp file and rename) and the journal is removed. Opening or reloading
/// replays the journal over the state file.
pub struct FileStore {
    path: PathBuf,
    journal: PathBuf,
    state: Mutex<State>,
}

impl FileStore {
    /// Open the store in `data_dir`, starting empty when no state file exists yet.
    pub async fn open(data_dir: &Path) -> FeedSyncResult<Self> {
        let path = data_dir.join(STATE_FILE);
        let journal = data_dir.join(JOURNAL_FILE);
        let state = load(&path, &journal).await?;

        Ok(FileStore {
            path,
            journal,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> (Vec<FeedSource>, Vec<MaterializedEvent>) {
        let state = self.state.lock().await;
        (state.data.sources.clone(), state.data.events.clone())
    }

    async fn append(&self, entry: &JournalEntry) -> FeedSyncResult<()> {
        let mut line =
            serde_json::to_string(entry).map_err(|e| FeedSyncError::Serialization(e.to_string()))?;
        line.push('\n');

        if let Some(dir) = self.journal.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Write the full state file, then drop the journal it now contains.
    async fn compact(&self, data: &StoreData) -> FeedSyncResult<()> {
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| FeedSyncError::Serialization(e.to_string()))?;
        let temp = self.path.with_extension("json.tmp");

        tokio::fs::write(&temp, content).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        match tokio::fs::remove_file(&self.journal).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `entry` in memory and journal it when it changed something.
    async fn mutate(&self, entry: JournalEntry) -> FeedSyncResult<bool> {
        let mut state = self.state.lock().await;
        if !entry.apply(&mut state.data)? {
            return Ok(false);
        }

        if let Err(e) = self.append(&entry).await {
            // Memory must not run ahead of disk
            match load(&self.path, &self.journal).await {
                Ok(on_disk) => *state = on_disk,
                Err(reload) => tracing::error!(error = %reload, "failed to reload store after a failed write"),
            }
            return Err(e);
        }

        state.journal_len += 1;
        if state.journal_len >= COMPACT_AFTER {
            match self.compact(&state.data).await {
                Ok(()) => state.journal_len = 0,
                Err(e) => tracing::warn!(error = %e, journal = %self.journal.display(), "failed to compact journal"),
            }
        }
        Ok(true)
    }
}

/// State file with the journal replayed over it.
async fn load(path: &Path, journal: &Path) -> FeedSyncResult<State> {
    let mut data: StoreData = match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).map_err(|e| {
            FeedSyncError::Storage(format!("Failed to read {}: {e}", path.display()))
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
        Err(e) => return Err(e.into()),
    };

    let content = match tokio::fs::read_to_string(journal).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut journal_len = 0;
    for (index, line) in lines.iter().enumerate() {
        let entry: JournalEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            // A crash mid-append leaves at most the last line incomplete
            Err(e) if index + 1 == lines.len() => {
                tracing::warn!(error = %e, journal = %journal.display(), "ignoring incomplete journal entry");
                break;
            }
            Err(e) => {
                return Err(FeedSyncError::Storage(format!(
                    "Failed to read {} entry {}: {e}",
                    journal.display(),
                    index + 1
                )));
            }
        };

        // Entries can already be in the state file when a compaction was interrupted
        if let Err(e) = entry.apply(&mut data) {
            tracing::debug!(error = %e, "journal entry already applied");
        }
        journal_len += 1;
    }

    Ok(State { data, journal_len })
}

#[async_trait::async_trait]
impl Store for FileStore {
    async fn active_sources(&self, offset: usize, limit: usize) -> FeedSyncResult<Vec<FeedSource>> {
        Ok(self.state.lock().await.data.active_sources(offset, limit))
    }

    async fn all_sources(&self) -> FeedSyncResult<Vec<FeedSource>> {
        Ok(self.state.lock().await.data.sources.clone())
    }

    async fn find_source(&self, id: &SourceId) -> FeedSyncResult<Option<FeedSource>> {
        Ok(self.state.lock().await.data.find_source(id))
    }

    async fn save_source(&self, source: &FeedSource) -> FeedSyncResult<()> {
        self.mutate(JournalEntry::SaveSource {
            source: source.clone(),
        })
        .await?;
        Ok(())
    }

    async fn set_source_active(&self, id: &SourceId, active: bool) -> FeedSyncResult<()> {
        self.mutate(JournalEntry::SetSourceActive {
            id: id.clone(),
            active,
        })
        .await?;
        Ok(())
    }

    async fn materialized_events_for(&self, source_id: &SourceId) -> FeedSyncResult<Vec<MaterializedEvent>> {
        Ok(self.state.lock().await.data.materialized_events_for(source_id))
    }

    async fn find_materialized(&self, occurrence_id: &OccurrenceId) -> FeedSyncResult<Option<MaterializedEvent>> {
        Ok(self.state.lock().await.data.find_materialized(occurrence_id))
    }

    async fn materialized_ids(&self) -> FeedSyncResult<Vec<OccurrenceId>> {
        Ok(self.state.lock().await.data.materialized_ids())
    }

    async fn create_materialized(&self, event: &MaterializedEvent) -> FeedSyncResult<()> {
        self.mutate(JournalEntry::CreateMaterialized {
            event: event.clone(),
        })
        .await?;
        Ok(())
    }

    async fn delete_materialized(&self, occurrence_id: &OccurrenceId) -> FeedSyncResult<bool> {
        self.mutate(JournalEntry::DeleteMaterialized {
            occurrence_id: occurrence_id.clone(),
        })
        .await
    }

    async fn reload(&self) -> FeedSyncResult<()> {
        let on_disk = load(&self.path, &self.journal).await?;
        *self.state.lock().await = on_disk;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialized::RemoteEventRef;
    use crate::metadata::EventMetadata;
    use crate::source::GroupId;
    use chrono::{NaiveDate, Utc};
    use tempfile::TempDir;

    fn record(occurrence: &str, source_id: &SourceId) -> MaterializedEvent {
        MaterializedEvent {
            id: format!("local-{occurrence}"),
            occurrence_id: OccurrenceId::from(occurrence),
            source_id: Some(source_id.clone()),
            remote: RemoteEventRef {
                id: "17".into(),
                uuid: Some("5b1d".into()),
            },
            sequence: 1,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            start_time: Some("09:00".into()),
            duration: "01:00".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let source = FeedSource::new("https://example.com/cal.ics", GroupId::from("3"), EventMetadata::default());

        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.save_source(&source).await.unwrap();
            store.create_materialized(&record("e1", &source.id)).await.unwrap();
            store.set_source_active(&source.id, false).await.unwrap();
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        let reloaded = store.find_source(&source.id).await.unwrap().unwrap();
        assert!(!reloaded.active);
        let events = store.materialized_events_for(&source.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].occurrence_id, OccurrenceId::from("e1"));
        assert_eq!(events[0].remote.uuid.as_deref(), Some("5b1d"));
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_state_untouched() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let err = store.set_source_active(&SourceId::from("nope"), true).await;
        assert!(err.is_err());
        assert!(!store.path().exists());
        assert!(!dir.path().join(JOURNAL_FILE).exists());
    }

    #[tokio::test]
    async fn test_mutations_are_journaled_until_compaction() {
        let dir = TempDir::new().unwrap();
        let source = FeedSource::new("https://example.com/cal.ics", GroupId::from("3"), EventMetadata::default());
        let store = FileStore::open(dir.path()).await.unwrap();

        store.save_source(&source).await.unwrap();
        store.create_materialized(&record("e1", &source.id)).await.unwrap();
        assert!(!store.path().exists());

        let journal = std::fs::read_to_string(dir.path().join(JOURNAL_FILE)).unwrap();
        assert_eq!(journal.lines().count(), 2);

        // A delete of a missing record writes nothing
        assert!(!store.delete_materialized(&OccurrenceId::from("gone")).await.unwrap());
        let journal = std::fs::read_to_string(dir.path().join(JOURNAL_FILE)).unwrap();
        assert_eq!(journal.lines().count(), 2);

        for i in 0..COMPACT_AFTER - 2 {
            store.create_materialized(&record(&format!("bulk{i}"), &source.id)).await.unwrap();
        }
        assert!(store.path().exists());
        assert!(!dir.path().join(JOURNAL_FILE).exists());

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(
            reopened.materialized_ids().await.unwrap().len(),
            COMPACT_AFTER - 1
        );
    }

    #[tokio::test]
    async fn test_replay_ignores_torn_tail_and_already_applied_entries() {
        let dir = TempDir::new().unwrap();
        let source = FeedSource::new("https://example.com/cal.ics", GroupId::from("3"), EventMetadata::default());
        let first = record("e1", &source.id);

        let snapshot = StoreData {
            sources: vec![source.clone()],
            events: vec![first.clone()],
        };
        std::fs::write(dir.path().join(STATE_FILE), serde_json::to_string(&snapshot).unwrap()).unwrap();

        let replayed = serde_json::to_string(&JournalEntry::CreateMaterialized { event: first }).unwrap();
        let second = serde_json::to_string(&JournalEntry::CreateMaterialized {
            event: record("e2", &source.id),
        })
        .unwrap();
        let journal = format!("{replayed}\n{second}\n{{\"op\":\"create_mat");
        std::fs::write(dir.path().join(JOURNAL_FILE), journal).unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        let mut ids = store.materialized_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec![OccurrenceId::from("e1"), OccurrenceId::from("e2")]);
    }

    #[tokio::test]
    async fn test_corrupt_journal_entry_before_the_tail_is_a_storage_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(JOURNAL_FILE), "garbage\n{\"op\":\"save_source\"}\n").unwrap();

        let err = FileStore::open(dir.path()).await.err().unwrap();
        assert!(matches!(err, FeedSyncError::Storage(_)));
    }

    #[tokio::test]
    async fn test_reload_picks_up_writes_from_another_handle() {
        let dir = TempDir::new().unwrap();
        let source = FeedSource::new("https://example.com/cal.ics", GroupId::from("3"), EventMetadata::default());
        let daemon = FileStore::open(dir.path()).await.unwrap();
        let cli = FileStore::open(dir.path()).await.unwrap();

        cli.save_source(&source).await.unwrap();
        assert!(daemon.find_source(&source.id).await.unwrap().is_none());

        daemon.reload().await.unwrap();
        assert!(daemon.find_source(&source.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_state_is_a_storage_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STATE_FILE), "{not json").unwrap();

        let err = FileStore::open(dir.path()).await.err().unwrap();
        assert!(matches!(err, FeedSyncError::Storage(_)));
    }
}
