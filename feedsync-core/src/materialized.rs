//! Local records of occurrences that exist on the publisher.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::occurrence::{ExpandedOccurrence, OccurrenceId};
use crate::source::SourceId;

/// Identity the publisher assigned to a created event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteEventRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedEvent {
    /// Local identity
    pub id: String,
    /// Reconciliation key, unique across all sources
    pub occurrence_id: OccurrenceId,
    /// `None` for one-off uploads that belong to no subscription.
    pub source_id: Option<SourceId>,
    pub remote: RemoteEventRef,
    /// Feed SEQUENCE at creation time
    pub sequence: i64,

    // Display fields, in the occurrence's own zone
    pub start_date: NaiveDate,
    /// `HH:MM`, absent for all-day events
    pub start_time: Option<String>,
    /// `HH:MM`
    pub duration: String,

    pub created_at: DateTime<Utc>,
}

impl MaterializedEvent {
    /// Record for an occurrence the publisher has just accepted.
    pub fn new(
        occurrence: &ExpandedOccurrence,
        source_id: Option<SourceId>,
        remote: RemoteEventRef,
    ) -> Self {
        let start_time = (!occurrence.all_day).then(|| occurrence.start.format("%H:%M").to_string());

        MaterializedEvent {
            id: uuid::Uuid::new_v4().to_string(),
            occurrence_id: occurrence.id.clone(),
            source_id,
            remote,
            sequence: occurrence.sequence,
            start_date: occurrence.start.date_naive(),
            start_time,
            duration: format_duration(occurrence.duration().num_minutes()),
            created_at: Utc::now(),
        }
    }

    pub fn belongs_to(&self, source_id: &SourceId) -> bool {
        self.source_id.as_ref() == Some(source_id)
    }
}

/// Minutes as `HH:MM`. Negative lengths are shown by magnitude.
pub fn format_duration(minutes: i64) -> String {
    let minutes = minutes.abs();
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}
