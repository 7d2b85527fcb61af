#![allow(dead_code)]

use std::sync::Arc;

use feedsync_core::ics::ParseOptions;
use feedsync_core::publisher::InMemoryPublisher;
use feedsync_core::store::InMemoryStore;
use feedsync_core::sync::{ReconcileReport, RunReport, SourceOutcome};
use feedsync_core::{BatchRunner, RunOutcome, RunSettings, SourceId, StaticFeeds};

/// A VEVENT block. `start`/`end` are UTC stamps like `20250110T100000Z`.
pub fn vevent(uid: &str, summary: &str, start: &str, end: &str, rrule: Option<&str>) -> String {
    let mut lines = vec![
        "BEGIN:VEVENT".to_string(),
        format!("UID:{uid}"),
        format!("DTSTART:{start}"),
        format!("DTEND:{end}"),
        format!("SUMMARY:{summary}"),
    ];
    if let Some(rrule) = rrule {
        lines.push(format!("RRULE:{rrule}"));
    }
    lines.push("END:VEVENT".to_string());
    lines.join("\r\n")
}

pub fn calendar(events: &[String]) -> String {
    let mut doc = String::from("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//feedsync//tests//EN\r\n");
    for event in events {
        doc.push_str(event);
        doc.push_str("\r\n");
    }
    doc.push_str("END:VCALENDAR\r\n");
    doc
}

/// One-hour single events, one per uid, on consecutive days from 2025-01-10.
pub fn simple_feed(uids: &[&str]) -> String {
    let events: Vec<_> = uids
        .iter()
        .enumerate()
        .map(|(i, uid)| {
            let day = i + 10;
            vevent(
                uid,
                uid,
                &format!("202501{day:02}T100000Z"),
                &format!("202501{day:02}T110000Z"),
                None,
            )
        })
        .collect();
    calendar(&events)
}

/// Settings that keep fixed past dates in the feed.
pub fn settings() -> RunSettings {
    RunSettings {
        parse: ParseOptions::unfiltered(chrono_tz::Tz::UTC),
        ..RunSettings::default()
    }
}

pub fn runner(store: &Arc<InMemoryStore>, publisher: &Arc<InMemoryPublisher>, feeds: StaticFeeds) -> BatchRunner {
    runner_with(store, publisher, feeds, settings())
}

pub fn runner_with(
    store: &Arc<InMemoryStore>,
    publisher: &Arc<InMemoryPublisher>,
    feeds: StaticFeeds,
    settings: RunSettings,
) -> BatchRunner {
    BatchRunner::new(store.clone(), publisher.clone(), Arc::new(feeds), settings)
}

pub fn completed(outcome: RunOutcome) -> RunReport {
    match outcome {
        RunOutcome::Completed(report) => report,
        RunOutcome::Skipped => panic!("run was skipped"),
    }
}

pub fn reconciled<'a>(report: &'a RunReport, source: &SourceId) -> &'a ReconcileReport {
    match report.get(source).map(|r| &r.outcome) {
        Some(SourceOutcome::Reconciled(report)) => report,
        other => panic!("source {source} was not reconciled: {other:?}"),
    }
}
