//! Manual uploads: previewing a calendar file and importing it once.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::error::{FeedSyncError, FeedSyncResult};
use crate::event::RawFeedEvent;
use crate::feed::FeedFetcher;
use crate::ics::parse_feed;
use crate::materialized::format_duration;
use crate::metadata::EventMetadata;
use crate::occurrence::{ExpandedOccurrence, KnownOccurrences, OccurrenceId, expand_feed};
use crate::publisher::Publisher;
use crate::scheduler::RunSettings;
use crate::source::GroupId;
use crate::store::Store;
use crate::sync::{ApplyContext, ReconcileReport, SourceDiff};

/// One occurrence as shown to a person reviewing an upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewEvent {
    pub id: OccurrenceId,
    pub uid: String,
    pub summary: String,
    pub dtstart: DateTime<FixedOffset>,
    pub dtend: DateTime<FixedOffset>,
    /// `HH:MM`
    pub duration: String,
    pub all_day: bool,
    pub description: Option<String>,
    pub url: Option<String>,
    pub tags: Vec<String>,
    pub sequence: i64,
    pub already_exists: bool,
}

impl PreviewEvent {
    fn new(occurrence: &ExpandedOccurrence, event: Option<&RawFeedEvent>) -> Self {
        PreviewEvent {
            id: occurrence.id.clone(),
            uid: occurrence.source_uid.clone(),
            summary: occurrence.summary.clone(),
            dtstart: occurrence.start.fixed_offset(),
            dtend: occurrence.end.fixed_offset(),
            duration: format_duration(occurrence.duration().num_minutes()),
            all_day: occurrence.all_day,
            description: occurrence.overrides.description.clone(),
            url: event.and_then(|e| e.url.clone()),
            tags: event.map(|e| e.tags.clone()).unwrap_or_default(),
            sequence: occurrence.sequence,
            already_exists: occurrence.already_exists,
        }
    }
}

/// Either `{"events": [...]}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PreviewResponse {
    Events { events: Vec<PreviewEvent> },
    Error { error: String },
}

impl PreviewResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, PreviewResponse::Error { .. })
    }
}

/// Expand an uploaded document for review.
///
/// Only occurrences that are not materialized yet are listed unless
/// `include_existing` is set. Problems come back as an error payload.
pub fn preview(
    content: &str,
    settings: &RunSettings,
    known: &KnownOccurrences,
    include_existing: bool,
    now: DateTime<Utc>,
) -> PreviewResponse {
    match preview_events(content, settings, known, include_existing, now) {
        Ok(events) => PreviewResponse::Events { events },
        Err(e) => PreviewResponse::Error {
            error: format!("Error parsing ical: {e}"),
        },
    }
}

fn preview_events(
    content: &str,
    settings: &RunSettings,
    known: &KnownOccurrences,
    include_existing: bool,
    now: DateTime<Utc>,
) -> FeedSyncResult<Vec<PreviewEvent>> {
    let events = parse_feed(content, &settings.parse, now)?;
    let expansion = expand_feed(&events, &settings.expansion, known)?;

    let occurrences = if include_existing {
        expansion.occurrences
    } else {
        known.filter_new(expansion.occurrences)
    };

    let by_uid: HashMap<_, _> = events.iter().map(|e| (e.uid.as_str(), e)).collect();
    Ok(occurrences
        .iter()
        .map(|o| PreviewEvent::new(o, by_uid.get(o.source_uid.as_str()).copied()))
        .collect())
}

/// Fetch a document, then [`preview`] it. Fetch failures become error payloads too.
pub async fn preview_location(
    fetcher: &dyn FeedFetcher,
    location: &str,
    settings: &RunSettings,
    known: &KnownOccurrences,
    include_existing: bool,
) -> PreviewResponse {
    match fetcher.fetch(location).await {
        Ok(content) => preview(&content, settings, known, include_existing, Utc::now()),
        Err(e) => PreviewResponse::Error {
            error: e.to_string(),
        },
    }
}

/// A one-off import into a group.
pub struct Upload<'a> {
    pub content: &'a str,
    pub group: &'a GroupId,
    pub defaults: &'a EventMetadata,
    /// Import only these occurrences; `None` imports all new ones.
    pub selected: Option<&'a HashSet<OccurrenceId>>,
}

/// Create every new occurrence of an uploaded document.
///
/// The records belong to no source, so later feed runs never retire them,
/// and feeds producing the same ids will not create duplicates.
pub async fn import_upload(
    store: &dyn Store,
    publisher: &dyn Publisher,
    upload: Upload<'_>,
    settings: &RunSettings,
    now: DateTime<Utc>,
) -> FeedSyncResult<ReconcileReport> {
    let groups = publisher.list_groups().await?;
    if !groups.contains(upload.group) {
        return Err(FeedSyncError::GroupNotFound(upload.group.clone()));
    }

    let events = parse_feed(upload.content, &settings.parse, now)?;
    let known = KnownOccurrences::new(store.materialized_ids().await?);
    let mut occurrences = expand_feed(&events, &settings.expansion, &known)?.occurrences;

    if let Some(selected) = upload.selected {
        occurrences.retain(|o| selected.contains(&o.id));
    }

    let diff = SourceDiff::compute(None, occurrences, Vec::new(), &known);
    tracing::info!(
        group_id = %upload.group,
        to_create = diff.to_create.len(),
        already_materialized = diff.materialized_elsewhere.len(),
        "importing upload"
    );

    Ok(diff
        .apply(&ApplyContext {
            store,
            publisher,
            known: &known,
            group: upload.group,
            source_defaults: upload.defaults,
            publish_defaults: &settings.publish_defaults,
            retire_remote_events: false,
        })
        .await)
}
