//! Feed parsing using the icalendar crate's parser.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{
    CalendarDateTime, DatePerhapsTime,
    parser::{Component, Property, read_calendar, unfold},
};

use crate::constants::{
    DEFAULT_FILTER_DAYS_AFTER, DEFAULT_FILTER_DAYS_BEFORE, DEFAULT_TIMEZONE, UNTITLED_EVENT,
};
use crate::error::{FeedSyncError, FeedSyncResult};
use crate::event::RawFeedEvent;
use crate::metadata::{EventMetadata, EventStatus};

/// Options applied while turning a feed into events.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Zone for floating and all-day times, and for unknown TZIDs.
    pub default_timezone: Tz,
    /// Drop non-recurring events that started more than this many days ago.
    pub filter_days_before: Option<i64>,
    /// Drop non-recurring events starting more than this many days ahead.
    pub filter_days_after: Option<i64>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            default_timezone: DEFAULT_TIMEZONE,
            filter_days_before: Some(DEFAULT_FILTER_DAYS_BEFORE),
            filter_days_after: Some(DEFAULT_FILTER_DAYS_AFTER),
        }
    }
}

impl ParseOptions {
    /// Keep every event regardless of its date.
    pub fn unfiltered(default_timezone: Tz) -> Self {
        ParseOptions {
            default_timezone,
            filter_days_before: None,
            filter_days_after: None,
        }
    }

    fn in_window(&self, start: &DateTime<Tz>, now: DateTime<Utc>) -> bool {
        // A bound outside chrono's range leaves that side of the window open.
        let start = start.with_timezone(&Utc);
        let earliest = self
            .filter_days_before
            .and_then(TimeDelta::try_days)
            .and_then(|d| now.checked_sub_signed(d));
        let latest = self
            .filter_days_after
            .and_then(TimeDelta::try_days)
            .and_then(|d| now.checked_add_signed(d));

        earliest.is_none_or(|earliest| start >= earliest)
            && latest.is_none_or(|latest| start <= latest)
    }
}

/// Parse a whole feed into normalized events.
///
/// Events are deduplicated by UID (first one wins). Instance overrides
/// (VEVENTs carrying RECURRENCE-ID) and events missing UID or DTSTART are skipped.
pub fn parse_feed(
    content: &str,
    options: &ParseOptions,
    now: DateTime<Utc>,
) -> FeedSyncResult<Vec<RawFeedEvent>> {
    if !content.contains("BEGIN:VCALENDAR") {
        return Err(FeedSyncError::IcsParse(
            "Content is not an iCalendar document".into(),
        ));
    }

    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).map_err(FeedSyncError::IcsParse)?;

    let mut vevents = Vec::new();
    collect_vevents(&calendar.components, &mut vevents);

    let mut seen_uids = HashSet::new();
    let mut events = Vec::new();

    for vevent in vevents {
        if vevent.find_prop("RECURRENCE-ID").is_some() {
            tracing::debug!("Skipping instance override without its own series");
            continue;
        }

        let Some(event) = parse_event(vevent, options) else {
            continue;
        };

        if !seen_uids.insert(event.uid.clone()) {
            tracing::debug!(uid = %event.uid, "Duplicate UID in feed, keeping first");
            continue;
        }

        if !event.is_recurring() && !options.in_window(&event.start, now) {
            continue;
        }

        events.push(event);
    }

    Ok(events)
}

fn collect_vevents<'a, 'b>(components: &'b [Component<'a>], out: &mut Vec<&'b Component<'a>>) {
    for component in components {
        if component.name == "VEVENT" {
            out.push(component);
        } else {
            collect_vevents(&component.components, out);
        }
    }
}

fn parse_event(vevent: &Component, options: &ParseOptions) -> Option<RawFeedEvent> {
    let default_tz = options.default_timezone;

    let Some(uid) = vevent
        .find_prop("UID")
        .map(|p| p.val.as_ref().trim().to_string())
        .filter(|uid| !uid.is_empty())
    else {
        tracing::warn!("Skipping VEVENT without UID");
        return None;
    };

    let Some((start, all_day)) = vevent
        .find_prop("DTSTART")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(|dpt| to_zoned(dpt, default_tz))
    else {
        tracing::warn!(%uid, "Skipping VEVENT without a usable DTSTART");
        return None;
    };

    let Some(end) = resolve_end(vevent, start, all_day, default_tz) else {
        tracing::warn!(%uid, "Skipping VEVENT whose end is out of range");
        return None;
    };

    let summary = vevent
        .find_prop("SUMMARY")
        .map(|p| unescape_text(p.val.as_ref()))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| UNTITLED_EVENT.to_string());

    let description = vevent
        .find_prop("DESCRIPTION")
        .map(|p| unescape_text(p.val.as_ref()))
        .filter(|s| !s.trim().is_empty());

    let url = vevent
        .find_prop("URL")
        .map(|p| p.val.as_ref().trim().to_string())
        .filter(|s| !s.is_empty());

    let status = vevent
        .find_prop("STATUS")
        .and_then(|p| EventStatus::from_ics_str(p.val.as_ref()));

    let sequence = vevent
        .find_prop("SEQUENCE")
        .and_then(|p| p.val.as_ref().trim().parse().ok())
        .unwrap_or(0);

    let rrule = vevent
        .find_prop("RRULE")
        .map(|p| p.val.as_ref().trim().to_string())
        .filter(|r| !r.is_empty());

    let exdates = vevent
        .properties
        .iter()
        .filter(|p| p.name == "EXDATE")
        .flat_map(|p| parse_exdate_property(p, default_tz))
        .collect();

    let mut tags: Vec<String> = Vec::new();
    for prop in vevent.properties.iter().filter(|p| p.name == "CATEGORIES") {
        for tag in split_text_list(prop.val.as_ref()) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }

    let overrides = EventMetadata {
        description,
        status,
        online_address: url.clone(),
        ..Default::default()
    };

    Some(RawFeedEvent {
        uid,
        summary,
        start,
        end,
        all_day,
        rrule,
        exdates,
        overrides,
        tags,
        url,
        sequence,
    })
}

/// DTEND, else DTSTART + DURATION, else one day for all-day events and
/// zero length otherwise. `None` when the end does not fit a `DateTime`.
fn resolve_end(
    vevent: &Component,
    start: DateTime<Tz>,
    all_day: bool,
    default_tz: Tz,
) -> Option<DateTime<Tz>> {
    if let Some(dpt) = vevent
        .find_prop("DTEND")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
    {
        return Some(to_zoned(dpt, default_tz).0);
    }

    if let Some(duration) = vevent
        .find_prop("DURATION")
        .and_then(|p| parse_duration(p.val.as_ref()))
    {
        return start.checked_add_signed(duration);
    }

    if all_day {
        start.checked_add_signed(TimeDelta::days(1))
    } else {
        Some(start)
    }
}

/// Resolve icalendar's DatePerhapsTime into a zoned instant.
/// Returns whether the value was a plain date (all-day).
fn to_zoned(dpt: DatePerhapsTime, default_tz: Tz) -> (DateTime<Tz>, bool) {
    match dpt {
        DatePerhapsTime::Date(d) => (start_of_day(d, default_tz), true),
        DatePerhapsTime::DateTime(cal_dt) => {
            let dt = match cal_dt {
                CalendarDateTime::Utc(dt) => dt.with_timezone(&Tz::UTC),
                CalendarDateTime::Floating(naive) => localize(default_tz, naive),
                CalendarDateTime::WithTimezone { date_time, tzid } => {
                    localize(resolve_tzid(&tzid, default_tz), date_time)
                }
            };
            (dt, false)
        }
    }
}

fn start_of_day(date: NaiveDate, tz: Tz) -> DateTime<Tz> {
    localize(tz, date.and_time(NaiveTime::MIN))
}

/// Look up an IANA zone name; anything else (e.g. Windows zone names) maps to the default.
fn resolve_tzid(tzid: &str, default_tz: Tz) -> Tz {
    let name = tzid.trim().trim_matches('"');
    name.parse::<Tz>().unwrap_or_else(|_| {
        tracing::debug!(tzid = name, "Unknown TZID, using default timezone");
        default_tz
    })
}

/// Place a wall-clock time in a zone. Ambiguous times take the earlier
/// instant; times inside a DST gap are pushed forward by an hour.
pub(crate) fn localize(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            naive
                .checked_add_signed(TimeDelta::hours(1))
                .and_then(|shifted| tz.from_local_datetime(&shifted).earliest())
        })
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

/// Parse a DURATION value (`PT1H30M`, `P1D`, ...).
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim().trim_start_matches('+');
    let duration = iso8601::duration(value).ok()?;
    let std_duration: std::time::Duration = duration.into();
    Duration::from_std(std_duration).ok()
}

/// Parse an EXDATE property into a list of instants.
///
/// Handles:
/// - TZID parameter: `EXDATE;TZID=America/New_York:20240108T100000`
/// - VALUE=DATE: `EXDATE;VALUE=DATE:20240108`
/// - UTC: `EXDATE:20240108T100000Z`
/// - Floating: `EXDATE:20240108T100000`
/// - Comma-separated values: `EXDATE;TZID=...:20240108T100000,20240115T100000`
fn parse_exdate_property(prop: &Property, default_tz: Tz) -> Vec<DateTime<Tz>> {
    let tz = prop
        .params
        .iter()
        .find(|p| p.key == "TZID")
        .and_then(|p| p.val.as_ref())
        .map(|v| resolve_tzid(v.as_ref(), default_tz));

    let is_date = prop
        .params
        .iter()
        .any(|p| p.key == "VALUE" && p.val.as_ref().map(|v| v.as_ref()) == Some("DATE"));

    prop.val
        .as_ref()
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if is_date {
                NaiveDate::parse_from_str(s, "%Y%m%d")
                    .ok()
                    .map(|d| start_of_day(d, tz.unwrap_or(default_tz)))
            } else if let Some(s) = s.strip_suffix('Z') {
                NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| dt.and_utc().with_timezone(&Tz::UTC))
            } else {
                NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| localize(tz.unwrap_or(default_tz), dt))
            }
        })
        .collect()
}

/// Undo RFC 5545 TEXT escaping (`\n`, `\,`, `\;`, `\\`).
fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Split a comma-separated TEXT list, honouring escaped commas.
fn split_text_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in value.chars() {
        match c {
            _ if escaped => {
                current.push('\\');
                current.push(c);
                escaped = false;
            }
            '\\' => escaped = true,
            ',' => items.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    items.push(current);

    items
        .iter()
        .map(|item| unescape_text(item.trim()))
        .filter(|item| !item.is_empty())
        .collect()
}
