mod common;

use chrono::{Duration, TimeZone, Utc};
use feedsync_core::ics::{ParseOptions, parse_feed};
use feedsync_core::occurrence::{ExpansionOptions, expand_event};
use feedsync_core::RawFeedEvent;

use common::{calendar, vevent};

fn parse_one(event: String) -> RawFeedEvent {
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let mut events = parse_feed(
        &calendar(&[event]),
        &ParseOptions::unfiltered(chrono_tz::Tz::UTC),
        now,
    )
    .unwrap();
    assert_eq!(events.len(), 1);
    events.remove(0)
}

#[test]
fn non_recurring_event_keeps_its_uid() {
    let event = parse_one(vevent("e1", "Launch", "20250110T100000Z", "20250110T120000Z", None));

    let expansion = expand_event(&event, &ExpansionOptions::default()).unwrap();

    assert_eq!(expansion.occurrences.len(), 1);
    let occurrence = &expansion.occurrences[0];
    assert_eq!(occurrence.id.as_str(), "e1");
    assert_eq!(occurrence.start, event.start);
    assert_eq!(occurrence.duration(), Duration::hours(2));
}

#[test]
fn weekly_count_expands_to_exact_instances() {
    let event = parse_one(vevent(
        "e1",
        "Choir",
        "20250106T090000Z",
        "20250106T100000Z",
        Some("FREQ=WEEKLY;COUNT=3"),
    ));

    let expansion = expand_event(&event, &ExpansionOptions::default()).unwrap();

    let ids: Vec<_> = expansion.occurrences.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["e1__20250106T090000", "e1__20250113T090000", "e1__20250120T090000"]
    );
    for (occurrence, day) in expansion.occurrences.iter().zip([6, 13, 20]) {
        assert_eq!(
            occurrence.start.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2025, 1, day, 9, 0, 0).unwrap()
        );
        assert_eq!(occurrence.duration(), Duration::hours(1));
    }
}

#[test]
fn expansion_is_deterministic() {
    let event = parse_one(vevent(
        "series",
        "Series",
        "20250103T180000Z",
        "20250103T200000Z",
        Some("FREQ=MONTHLY;BYDAY=1FR;COUNT=6"),
    ));
    let options = ExpansionOptions::default();

    let first = expand_event(&event, &options).unwrap();
    let second = expand_event(&event, &options).unwrap();

    let pairs = |e: &feedsync_core::occurrence::EventExpansion| {
        e.occurrences
            .iter()
            .map(|o| (o.id.clone(), o.start, o.end))
            .collect::<Vec<_>>()
    };
    assert_eq!(pairs(&first), pairs(&second));
    assert_eq!(first.occurrences.len(), 6);
}

#[test]
fn unbounded_rules_stop_within_a_year() {
    for rrule in ["FREQ=WEEKLY", "FREQ=MONTHLY", "FREQ=YEARLY", "FREQ=DAILY"] {
        let event = parse_one(vevent(
            "open",
            "Open ended",
            "20250106T090000Z",
            "20250106T100000Z",
            Some(rrule),
        ));

        let expansion = expand_event(&event, &ExpansionOptions::default()).unwrap();

        let limit = event.start + chrono::Months::new(12);
        assert!(!expansion.occurrences.is_empty(), "{rrule}");
        assert!(
            expansion.occurrences.iter().all(|o| o.start <= limit),
            "{rrule} ran past one year"
        );
    }
}

#[test]
fn occurrence_count_never_exceeds_maximum() {
    let event = parse_one(vevent(
        "long",
        "Long",
        "20250106T090000Z",
        "20250106T100000Z",
        Some("FREQ=WEEKLY;COUNT=1000"),
    ));

    let default = expand_event(&event, &ExpansionOptions::default()).unwrap();
    assert_eq!(default.occurrences.len(), 365);

    let small = expand_event(&event, &ExpansionOptions { max_occurrences: 10 }).unwrap();
    assert_eq!(small.occurrences.len(), 10);
}
