//! Per-source diff computation and application.

use std::collections::{HashMap, HashSet};

use crate::materialized::MaterializedEvent;
use crate::metadata::{EventMetadata, PublishDefaults, PublishedEvent};
use crate::occurrence::{ExpandedOccurrence, KnownOccurrences, OccurrenceId};
use crate::publisher::Publisher;
use crate::source::{GroupId, SourceId};
use crate::store::Store;
use crate::sync::{DiffKind, ReconcileReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleOccurrence {
    pub occurrence_id: OccurrenceId,
    pub recorded_sequence: i64,
    pub feed_sequence: i64,
}

/// What has to happen for one source's materialized set to match its feed.
#[derive(Debug, Clone, Default)]
pub struct SourceDiff {
    /// `None` for one-off uploads.
    pub source_id: Option<SourceId>,
    /// New occurrences, earliest first.
    pub to_create: Vec<ExpandedOccurrence>,
    /// Records whose occurrence left the feed.
    pub to_delete: Vec<MaterializedEvent>,
    pub unchanged: Vec<OccurrenceId>,
    /// Subset of `unchanged` whose feed SEQUENCE differs from the recorded one.
    pub stale: Vec<StaleOccurrence>,
    /// Not ours, but already materialized through another source or upload.
    pub materialized_elsewhere: Vec<OccurrenceId>,
}

/// Collaborators and settings needed to apply a diff.
pub struct ApplyContext<'a> {
    pub store: &'a dyn Store,
    pub publisher: &'a dyn Publisher,
    pub known: &'a KnownOccurrences,
    pub group: &'a GroupId,
    pub source_defaults: &'a EventMetadata,
    pub publish_defaults: &'a PublishDefaults,
    /// Also delete the publisher's copy of a retired occurrence.
    pub retire_remote_events: bool,
}

impl SourceDiff {
    /// Compare the full desired set against the records this source owns.
    ///
    /// `existing` must only hold records of `source_id`; records of other
    /// sources are never scheduled for deletion.
    pub fn compute(
        source_id: Option<&SourceId>,
        desired: Vec<ExpandedOccurrence>,
        existing: Vec<MaterializedEvent>,
        known: &KnownOccurrences,
    ) -> SourceDiff {
        let existing: Vec<_> = existing
            .into_iter()
            .filter(|record| record.source_id.as_ref() == source_id)
            .collect();

        let desired_ids: HashSet<_> = desired.iter().map(|o| o.id.clone()).collect();
        let existing_by_id: HashMap<_, _> = existing
            .iter()
            .map(|record| (record.occurrence_id.clone(), record))
            .collect();

        let mut to_delete: Vec<_> = existing
            .iter()
            .filter(|record| !desired_ids.contains(&record.occurrence_id))
            .cloned()
            .collect();
        to_delete.sort_by(|a, b| {
            (a.start_date, &a.occurrence_id).cmp(&(b.start_date, &b.occurrence_id))
        });

        let mut to_create = Vec::new();
        let mut unchanged = Vec::new();
        let mut stale = Vec::new();
        let mut materialized_elsewhere = Vec::new();

        for occurrence in desired {
            if let Some(record) = existing_by_id.get(&occurrence.id) {
                if record.sequence != occurrence.sequence {
                    stale.push(StaleOccurrence {
                        occurrence_id: occurrence.id.clone(),
                        recorded_sequence: record.sequence,
                        feed_sequence: occurrence.sequence,
                    });
                }
                unchanged.push(occurrence.id);
            } else if known.contains(&occurrence.id) {
                materialized_elsewhere.push(occurrence.id);
            } else {
                to_create.push(occurrence);
            }
        }

        // Sort by occurrence start (ascending)
        to_create.sort_by(|a, b| (a.start.to_utc(), &a.id).cmp(&(b.start.to_utc(), &b.id)));

        SourceDiff {
            source_id: source_id.cloned(),
            to_create,
            to_delete,
            unchanged,
            stale,
            materialized_elsewhere,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }

    /// Pending changes in the order they are applied, for display.
    pub fn changes(&self) -> Vec<(DiffKind, &OccurrenceId)> {
        let deletes = self.to_delete.iter().map(|r| (DiffKind::Delete, &r.occurrence_id));
        let creates = self.to_create.iter().map(|o| (DiffKind::Create, &o.id));
        let stale = self.stale.iter().map(|s| (DiffKind::Stale, &s.occurrence_id));
        deletes.chain(creates).chain(stale).collect()
    }

    /// Apply deletes, then creates.
    ///
    /// Failures are contained per occurrence: each one is logged, counted in
    /// the report and leaves the store consistent. A record is only written
    /// once the publisher has confirmed the event.
    pub async fn apply(&self, ctx: &ApplyContext<'_>) -> ReconcileReport {
        let mut report = ReconcileReport {
            unchanged: self.unchanged.len(),
            stale: self.stale.len(),
            materialized_elsewhere: self.materialized_elsewhere.len(),
            ..Default::default()
        };
        let source_id = self.source_id.as_ref().map(SourceId::as_str).unwrap_or("upload");

        for stale in &self.stale {
            tracing::info!(
                source_id,
                occurrence_id = %stale.occurrence_id,
                recorded_sequence = stale.recorded_sequence,
                feed_sequence = stale.feed_sequence,
                "occurrence changed upstream, keeping published version"
            );
        }

        for record in &self.to_delete {
            if ctx.retire_remote_events {
                if let Err(e) = ctx.publisher.delete_event(&record.remote).await {
                    tracing::warn!(
                        source_id,
                        occurrence_id = %record.occurrence_id,
                        remote_id = %record.remote.id,
                        error = %e,
                        "failed to delete remote event, keeping local record"
                    );
                    report.failed_deletes.push(record.occurrence_id.clone());
                    continue;
                }
            }

            match ctx.store.delete_materialized(&record.occurrence_id).await {
                Ok(_) => {
                    tracing::debug!(source_id, occurrence_id = %record.occurrence_id, "retired occurrence");
                    report.deleted.push(record.occurrence_id.clone());
                }
                Err(e) => {
                    tracing::warn!(
                        source_id,
                        occurrence_id = %record.occurrence_id,
                        error = %e,
                        "failed to delete materialized event"
                    );
                    report.failed_deletes.push(record.occurrence_id.clone());
                }
            }
        }

        for occurrence in &self.to_create {
            // Another source may have created it since the snapshot was taken
            if !ctx.known.claim(&occurrence.id) {
                tracing::debug!(source_id, occurrence_id = %occurrence.id, "already materialized, skipping");
                report.materialized_elsewhere += 1;
                continue;
            }

            if let Err(reason) = self.create(ctx, occurrence).await {
                ctx.known.release(&occurrence.id);
                tracing::warn!(
                    source_id,
                    occurrence_id = %occurrence.id,
                    error = %reason,
                    "failed to create occurrence"
                );
                report.failed_creates.push(occurrence.id.clone());
                continue;
            }

            report.created.push(occurrence.id.clone());
        }

        report
    }

    async fn create(&self, ctx: &ApplyContext<'_>, occurrence: &ExpandedOccurrence) -> Result<(), String> {
        let payload =
            PublishedEvent::build(occurrence, ctx.source_defaults, ctx.group, ctx.publish_defaults);

        let remote = ctx
            .publisher
            .create_event(&payload)
            .await
            .map_err(|e| e.to_string())?;

        let record = MaterializedEvent::new(occurrence, self.source_id.clone(), remote.clone());
        if let Err(e) = ctx.store.create_materialized(&record).await {
            // Undo the remote side so the next run can retry cleanly
            if let Err(undo) = ctx.publisher.delete_event(&remote).await {
                tracing::error!(
                    occurrence_id = %occurrence.id,
                    remote_id = %remote.id,
                    error = %undo,
                    "remote event created but neither recorded nor removed"
                );
            }
            return Err(format!("failed to record created event: {e}"));
        }

        Ok(())
    }
}
