//! Occurrence identity and expansion of feed events into concrete instances.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_MAX_OCCURRENCES, OCCURRENCE_ID_SEPARATOR, OCCURRENCE_TIMESTAMP_FORMAT,
};
use crate::error::{FeedSyncError, FeedSyncResult};
use crate::event::RawFeedEvent;
use crate::metadata::EventMetadata;
use crate::recurrence::{RecurrenceRule, RuleCorrection};

/// Stable key of one occurrence across runs.
///
/// `uid` for a single event, `uid__20250106T090000` for one instance of a
/// series, the timestamp being the instance start in the event's own zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OccurrenceId(pub String);

impl OccurrenceId {
    pub fn single(uid: &str) -> Self {
        OccurrenceId(uid.to_string())
    }

    pub fn for_instance(uid: &str, start: &DateTime<Tz>) -> Self {
        OccurrenceId(format!(
            "{uid}{OCCURRENCE_ID_SEPARATOR}{}",
            start.format(OCCURRENCE_TIMESTAMP_FORMAT)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OccurrenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OccurrenceId {
    fn from(id: &str) -> Self {
        OccurrenceId(id.to_string())
    }
}

/// One concrete instance of a feed event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedOccurrence {
    pub id: OccurrenceId,
    pub source_uid: String,
    pub summary: String,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub all_day: bool,
    pub overrides: EventMetadata,
    pub sequence: i64,
    /// Whether a materialized event with this id existed when the run started.
    pub already_exists: bool,
}

impl ExpandedOccurrence {
    fn from_event(event: &RawFeedEvent, id: OccurrenceId, start: DateTime<Tz>, end: DateTime<Tz>) -> Self {
        ExpandedOccurrence {
            id,
            source_uid: event.uid.clone(),
            summary: event.summary.clone(),
            start,
            end,
            all_day: event.all_day,
            overrides: event.overrides.clone(),
            sequence: event.sequence,
            already_exists: false,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Ids of every materialized event, read once at the start of a run.
///
/// Sources processed concurrently share one snapshot; [`KnownOccurrences::claim`]
/// makes "check then create" atomic across them.
#[derive(Debug, Default)]
pub struct KnownOccurrences {
    ids: Mutex<HashSet<OccurrenceId>>,
}

impl KnownOccurrences {
    pub fn new(ids: impl IntoIterator<Item = OccurrenceId>) -> Self {
        KnownOccurrences {
            ids: Mutex::new(ids.into_iter().collect()),
        }
    }

    fn ids(&self) -> std::sync::MutexGuard<'_, HashSet<OccurrenceId>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn contains(&self, id: &OccurrenceId) -> bool {
        self.ids().contains(id)
    }

    /// Reserve `id` for creation. Returns false when it is already taken.
    pub fn claim(&self, id: &OccurrenceId) -> bool {
        self.ids().insert(id.clone())
    }

    /// Give back a claim whose creation failed.
    pub fn release(&self, id: &OccurrenceId) {
        self.ids().remove(id);
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Only the occurrences that have not been materialized yet.
    pub fn filter_new(&self, occurrences: Vec<ExpandedOccurrence>) -> Vec<ExpandedOccurrence> {
        let ids = self.ids();
        occurrences
            .into_iter()
            .filter(|o| !ids.contains(&o.id))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpansionOptions {
    /// Upper bound on instances generated per recurring event.
    pub max_occurrences: u32,
}

impl Default for ExpansionOptions {
    fn default() -> Self {
        ExpansionOptions {
            max_occurrences: DEFAULT_MAX_OCCURRENCES,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventExpansion {
    pub occurrences: Vec<ExpandedOccurrence>,
    pub corrections: Vec<RuleCorrection>,
}

/// Expand one event. Non-recurring events, and series whose rule produces no
/// instances, come back as a single occurrence keyed by the bare uid.
pub fn expand_event(event: &RawFeedEvent, options: &ExpansionOptions) -> FeedSyncResult<EventExpansion> {
    let single = || {
        vec![ExpandedOccurrence::from_event(
            event,
            OccurrenceId::single(&event.uid),
            event.start,
            event.end,
        )]
    };

    let Some(rrule) = event.rrule.as_deref().filter(|_| event.is_recurring()) else {
        return Ok(EventExpansion {
            occurrences: single(),
            corrections: Vec::new(),
        });
    };

    let parsed = RecurrenceRule::parse(rrule, &event.start);
    let starts = parsed
        .rule
        .occurrences(&event.start, &event.exdates, options.max_occurrences)
        .map_err(|reason| FeedSyncError::Recurrence {
            uid: event.uid.clone(),
            reason,
        })?;

    if starts.is_empty() {
        tracing::debug!(uid = %event.uid, rrule, "rule produced no instances, keeping base event");
        return Ok(EventExpansion {
            occurrences: single(),
            corrections: parsed.corrections,
        });
    }

    let duration = event.duration();
    let occurrences = starts
        .into_iter()
        .filter_map(|start| {
            let Some(end) = start.checked_add_signed(duration) else {
                tracing::warn!(uid = %event.uid, %start, "Skipping instance whose end is out of range");
                return None;
            };
            Some(ExpandedOccurrence::from_event(
                event,
                OccurrenceId::for_instance(&event.uid, &start),
                start,
                end,
            ))
        })
        .collect();

    Ok(EventExpansion {
        occurrences,
        corrections: parsed.corrections,
    })
}

/// Every occurrence of a feed plus the rule corrections applied on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedExpansion {
    pub occurrences: Vec<ExpandedOccurrence>,
    /// `(uid, correction)` pairs
    pub corrections: Vec<(String, RuleCorrection)>,
}

impl FeedExpansion {
    pub fn new_occurrences(&self) -> impl Iterator<Item = &ExpandedOccurrence> {
        self.occurrences.iter().filter(|o| !o.already_exists)
    }
}

/// Expand a parsed feed and mark which occurrences are already materialized.
///
/// Ids are unique in the result; on collision the first occurrence wins.
pub fn expand_feed(
    events: &[RawFeedEvent],
    options: &ExpansionOptions,
    known: &KnownOccurrences,
) -> FeedSyncResult<FeedExpansion> {
    let mut expansion = FeedExpansion::default();
    let mut seen = HashSet::new();

    for event in events {
        let EventExpansion {
            occurrences,
            corrections,
        } = expand_event(event, options)?;

        for correction in corrections {
            match &correction {
                RuleCorrection::FrequencyFallback { .. } | RuleCorrection::DroppedPart(_) => {
                    tracing::warn!(uid = %event.uid, %correction, "corrected recurrence rule");
                }
                RuleCorrection::DefaultUntil(_) => {
                    tracing::debug!(uid = %event.uid, %correction, "corrected recurrence rule");
                }
            }
            expansion.corrections.push((event.uid.clone(), correction));
        }

        for mut occurrence in occurrences {
            if !seen.insert(occurrence.id.clone()) {
                tracing::debug!(occurrence_id = %occurrence.id, "duplicate occurrence id in feed");
                continue;
            }
            occurrence.already_exists = known.contains(&occurrence.id);
            expansion.occurrences.push(occurrence);
        }
    }

    Ok(expansion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    fn event(uid: &str, rrule: Option<&str>) -> RawFeedEvent {
        let start = Tz::UTC.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        RawFeedEvent {
            uid: uid.to_string(),
            summary: "Choir rehearsal".to_string(),
            start,
            end: start + Duration::hours(1),
            all_day: false,
            rrule: rrule.map(str::to_string),
            exdates: Vec::new(),
            overrides: EventMetadata::default(),
            tags: Vec::new(),
            url: None,
            sequence: 2,
        }
    }

    fn ids(occurrences: &[ExpandedOccurrence]) -> Vec<&str> {
        occurrences.iter().map(|o| o.id.as_str()).collect()
    }

    #[test]
    fn test_single_event_keeps_bare_uid() {
        let expansion = expand_event(&event("e1", None), &ExpansionOptions::default()).unwrap();

        assert_eq!(ids(&expansion.occurrences), vec!["e1"]);
        assert_eq!(expansion.occurrences[0].sequence, 2);
        assert!(expansion.corrections.is_empty());
    }

    #[test]
    fn test_weekly_series_gets_instance_ids() {
        let expansion = expand_event(
            &event("e1", Some("FREQ=WEEKLY;COUNT=3")),
            &ExpansionOptions::default(),
        )
        .unwrap();

        assert_eq!(
            ids(&expansion.occurrences),
            vec!["e1__20250106T090000", "e1__20250113T090000", "e1__20250120T090000"]
        );
        for occurrence in &expansion.occurrences {
            assert_eq!(occurrence.duration(), Duration::hours(1));
            assert_eq!(occurrence.source_uid, "e1");
        }
    }

    #[test]
    fn test_instance_id_uses_event_zone() {
        let berlin = chrono_tz::Europe::Berlin;
        let start = berlin.with_ymd_and_hms(2025, 7, 1, 19, 30, 0).unwrap();
        assert_eq!(
            OccurrenceId::for_instance("abc", &start).as_str(),
            "abc__20250701T193000"
        );
    }

    #[test]
    fn test_empty_rule_result_passes_base_event_through() {
        let expansion = expand_event(
            &event("e1", Some("FREQ=WEEKLY;UNTIL=20200101T000000Z")),
            &ExpansionOptions::default(),
        )
        .unwrap();

        assert_eq!(ids(&expansion.occurrences), vec!["e1"]);
    }

    #[test]
    fn test_unbounded_rule_spans_at_most_one_year() {
        let base = event("e1", Some("FREQ=WEEKLY"));
        let expansion = expand_event(&base, &ExpansionOptions::default()).unwrap();

        let last = expansion.occurrences.last().unwrap();
        assert!(last.start <= base.start + Duration::days(366));
        assert_eq!(expansion.occurrences.len(), 53);
        assert!(
            expansion
                .corrections
                .iter()
                .any(|c| matches!(c, RuleCorrection::DefaultUntil(_)))
        );
    }

    #[test]
    fn test_instances_ending_out_of_range_are_skipped() {
        let mut base = event("e1", Some("FREQ=WEEKLY;COUNT=3"));
        base.end = Tz::UTC.from_utc_datetime(&(chrono::NaiveDateTime::MAX - Duration::days(3)));

        let expansion = expand_event(&base, &ExpansionOptions::default()).unwrap();

        assert_eq!(ids(&expansion.occurrences), vec!["e1__20250106T090000"]);
    }

    #[test]
    fn test_generator_rejection_is_a_recurrence_error() {
        let err = expand_event(
            &event("e1", Some("FREQ=WEEKLY;BYDAY=XX")),
            &ExpansionOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(err, FeedSyncError::Recurrence { ref uid, .. } if uid == "e1"));
    }

    #[test]
    fn test_expand_feed_marks_known_occurrences() {
        let known = KnownOccurrences::new([OccurrenceId::from("e1__20250113T090000")]);
        let expansion = expand_feed(
            &[event("e1", Some("FREQ=WEEKLY;COUNT=3")), event("e2", None)],
            &ExpansionOptions::default(),
            &known,
        )
        .unwrap();

        let flags: Vec<_> = expansion
            .occurrences
            .iter()
            .map(|o| (o.id.as_str(), o.already_exists))
            .collect();
        assert_eq!(
            flags,
            vec![
                ("e1__20250106T090000", false),
                ("e1__20250113T090000", true),
                ("e1__20250120T090000", false),
                ("e2", false),
            ]
        );
        assert_eq!(expansion.new_occurrences().count(), 3);
    }

    #[test]
    fn test_expand_feed_records_frequency_fallback() {
        let expansion = expand_feed(
            &[event("e1", Some("FREQ=DAILY;COUNT=2"))],
            &ExpansionOptions::default(),
            &KnownOccurrences::default(),
        )
        .unwrap();

        // Weekly, not daily
        assert_eq!(expansion.occurrences[1].start.day(), 13);
        assert!(matches!(
            expansion.corrections.as_slice(),
            [(uid, RuleCorrection::FrequencyFallback { .. })] if uid == "e1"
        ));
    }

    #[test]
    fn test_expand_feed_drops_colliding_ids() {
        let mut clash = event("e1__20250106T090000", None);
        clash.summary = "Clash".to_string();
        let expansion = expand_feed(
            &[event("e1", Some("FREQ=WEEKLY;COUNT=1")), clash],
            &ExpansionOptions::default(),
            &KnownOccurrences::default(),
        )
        .unwrap();

        assert_eq!(ids(&expansion.occurrences), vec!["e1__20250106T090000"]);
        assert_eq!(expansion.occurrences[0].summary, "Choir rehearsal");
    }

    #[test]
    fn test_claim_is_exclusive() {
        let known = KnownOccurrences::default();
        let id = OccurrenceId::from("e1");

        assert!(known.claim(&id));
        assert!(!known.claim(&id));
        known.release(&id);
        assert!(!known.contains(&id));
    }

    #[test]
    fn test_filter_new_hides_materialized() {
        let known = KnownOccurrences::new([OccurrenceId::from("e1")]);
        let occurrences = expand_event(&event("e1", None), &ExpansionOptions::default())
            .unwrap()
            .occurrences;
        assert!(known.filter_new(occurrences).is_empty());
    }
}
