//! Events as they come out of a parsed feed.

use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use serde::Serialize;

use crate::metadata::EventMetadata;

/// One VEVENT from a feed, normalized.
///
/// Rebuilt on every run and never persisted. Times are resolved into the
/// event's own zone so recurrence expansion keeps wall-clock times across DST.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawFeedEvent {
    /// Feed-assigned UID; unique within one feed only.
    pub uid: String,
    pub summary: String,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub all_day: bool,

    /// Raw RRULE value, e.g. `FREQ=WEEKLY;BYDAY=MO`
    pub rrule: Option<String>,
    /// Instances removed from the series (EXDATE)
    pub exdates: Vec<DateTime<Tz>>,

    /// Publishing fields the feed sets for this event (description, status, URL).
    pub overrides: EventMetadata,
    /// CATEGORIES
    pub tags: Vec<String>,
    pub url: Option<String>,

    /// Revision counter (SEQUENCE), 0 when absent
    pub sequence: i64,
}

impl RawFeedEvent {
    pub fn is_recurring(&self) -> bool {
        self.rrule.as_ref().is_some_and(|r| !r.trim().is_empty())
    }

    /// Length of the un-expanded event; every expanded instance inherits it.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn timezone(&self) -> Tz {
        self.start.timezone()
    }
}
