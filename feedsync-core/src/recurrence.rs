//! RRULE handling for recurring feed events.
//!
//! Rules are parsed leniently: unsupported frequencies fall back to weekly and
//! malformed parts are dropped, but every such correction is reported back in
//! [`ParsedRule::corrections`] so callers can log it. Every rule terminates:
//! without COUNT or UNTIL the series ends one year after its start.
//! Instances are generated by the `rrule` crate.

use std::fmt;

use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use rrule::RRuleSet;

use crate::ics::localize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Frequency {
    #[default]
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "WEEKLY" => Some(Frequency::Weekly),
            "MONTHLY" => Some(Frequency::Monthly),
            "YEARLY" => Some(Frequency::Yearly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A silent fix applied while reading a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleCorrection {
    /// FREQ was missing or not one of WEEKLY/MONTHLY/YEARLY.
    FrequencyFallback { found: Option<String> },
    /// A part that could not be understood and was ignored.
    DroppedPart(String),
    /// Neither COUNT nor UNTIL was given.
    DefaultUntil(DateTime<Utc>),
}

impl fmt::Display for RuleCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleCorrection::FrequencyFallback { found: Some(found) } => {
                write!(f, "unsupported FREQ '{found}' replaced by {}", Frequency::default())
            }
            RuleCorrection::FrequencyFallback { found: None } => {
                write!(f, "missing FREQ replaced by {}", Frequency::default())
            }
            RuleCorrection::DroppedPart(part) => write!(f, "ignored rule part '{part}'"),
            RuleCorrection::DefaultUntil(until) => {
                write!(f, "unbounded rule capped at {}", until.to_rfc3339())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    pub until: Option<DateTime<Utc>>,
    pub by_day: Vec<String>,
    pub by_month: Vec<u32>,
    pub by_month_day: Vec<i32>,
    pub by_set_pos: Vec<i32>,
}

/// A rule together with the corrections needed to make it usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRule {
    pub rule: RecurrenceRule,
    pub corrections: Vec<RuleCorrection>,
}

impl ParsedRule {
    pub fn frequency_fell_back(&self) -> bool {
        self.corrections
            .iter()
            .any(|c| matches!(c, RuleCorrection::FrequencyFallback { .. }))
    }
}

impl RecurrenceRule {
    /// Parse an RRULE value anchored at `start`.
    pub fn parse(value: &str, start: &DateTime<Tz>) -> ParsedRule {
        let mut corrections = Vec::new();
        let mut frequency = None;
        let mut frequency_token = None;
        let mut rule = RecurrenceRule {
            frequency: Frequency::default(),
            interval: 1,
            count: None,
            until: None,
            by_day: Vec::new(),
            by_month: Vec::new(),
            by_month_day: Vec::new(),
            by_set_pos: Vec::new(),
        };

        for part in value.trim().trim_start_matches("RRULE:").split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, val)) = part.split_once('=') else {
                corrections.push(RuleCorrection::DroppedPart(part.to_string()));
                continue;
            };

            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    frequency_token = Some(val.trim().to_string());
                    frequency = Frequency::from_token(val);
                }
                "INTERVAL" => match val.trim().parse::<u32>() {
                    Ok(n) if n > 0 => rule.interval = n,
                    _ => corrections.push(RuleCorrection::DroppedPart(part.to_string())),
                },
                "COUNT" => match val.trim().parse::<u32>() {
                    Ok(n) if n > 0 => rule.count = Some(n),
                    _ => corrections.push(RuleCorrection::DroppedPart(part.to_string())),
                },
                "UNTIL" => match parse_until(val, start.timezone()) {
                    Some(until) => rule.until = Some(until),
                    None => corrections.push(RuleCorrection::DroppedPart(part.to_string())),
                },
                "BYDAY" => {
                    rule.by_day = val
                        .split(',')
                        .map(|d| d.trim().to_ascii_uppercase())
                        .filter(|d| !d.is_empty())
                        .collect();
                }
                "BYMONTH" => rule.by_month = parse_int_list(val, part, &mut corrections),
                "BYMONTHDAY" => rule.by_month_day = parse_int_list(val, part, &mut corrections),
                "BYSETPOS" => rule.by_set_pos = parse_int_list(val, part, &mut corrections),
                _ => corrections.push(RuleCorrection::DroppedPart(part.to_string())),
            }
        }

        match frequency {
            Some(f) => rule.frequency = f,
            None => corrections.push(RuleCorrection::FrequencyFallback {
                found: frequency_token,
            }),
        }

        if rule.count.is_none() && rule.until.is_none() {
            let until = start
                .checked_add_months(Months::new(12))
                .unwrap_or(*start)
                .with_timezone(&Utc);
            rule.until = Some(until);
            corrections.push(RuleCorrection::DefaultUntil(until));
        }

        ParsedRule { rule, corrections }
    }

    /// The RRULE value handed to the generator.
    ///
    /// UNTIL is always written in UTC. When COUNT is present UNTIL is left out
    /// and applied afterwards, so whichever limit comes first still wins.
    pub fn to_rrule_value(&self) -> String {
        let mut parts = vec![format!("FREQ={}", self.frequency)];

        if self.interval > 1 {
            parts.push(format!("INTERVAL={}", self.interval));
        }

        match (self.count, self.until) {
            (Some(count), _) => parts.push(format!("COUNT={count}")),
            (None, Some(until)) => parts.push(format!("UNTIL={}", until.format("%Y%m%dT%H%M%SZ"))),
            (None, None) => {}
        }

        if !self.by_day.is_empty() {
            parts.push(format!("BYDAY={}", self.by_day.join(",")));
        }
        if !self.by_month.is_empty() {
            parts.push(format!("BYMONTH={}", join_ints(&self.by_month)));
        }
        if !self.by_month_day.is_empty() {
            parts.push(format!("BYMONTHDAY={}", join_ints(&self.by_month_day)));
        }
        if !self.by_set_pos.is_empty() {
            parts.push(format!("BYSETPOS={}", join_ints(&self.by_set_pos)));
        }

        parts.join(";")
    }

    /// Generate instance start times in chronological order.
    ///
    /// Stops at whichever of COUNT, UNTIL or `max_occurrences` is reached first.
    /// Returns the generator's message when it rejects the rule.
    pub fn occurrences(
        &self,
        start: &DateTime<Tz>,
        exdates: &[DateTime<Tz>],
        max_occurrences: u32,
    ) -> Result<Vec<DateTime<Tz>>, String> {
        let tz = start.timezone();

        if self.until.is_some_and(|until| until < start.with_timezone(&Utc)) {
            return Ok(Vec::new());
        }

        let limit = self
            .count
            .map_or(max_occurrences, |count| count.min(max_occurrences))
            .min(u32::from(u16::MAX)) as u16;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut lines = vec![
            format_anchor("DTSTART", start),
            format!("RRULE:{}", self.to_rrule_value()),
        ];
        for exdate in exdates {
            lines.push(format_anchor("EXDATE", &exdate.with_timezone(&tz)));
        }

        let rrule_set: RRuleSet = lines.join("\n").parse().map_err(|e: rrule::RRuleError| e.to_string())?;

        let result = rrule_set.all(limit);

        Ok(result
            .dates
            .iter()
            .map(|dt| dt.with_timezone(&tz))
            .filter(|dt| self.until.is_none_or(|until| dt.with_timezone(&Utc) <= until))
            .collect())
    }
}

/// `DTSTART:20250106T090000Z` for UTC, `DTSTART;TZID=Europe/Berlin:20250106T090000` otherwise.
fn format_anchor(name: &str, dt: &DateTime<Tz>) -> String {
    match dt.timezone() {
        Tz::UTC => format!("{name}:{}", dt.format("%Y%m%dT%H%M%SZ")),
        tz => format!("{name};TZID={}:{}", tz.name(), dt.format("%Y%m%dT%H%M%S")),
    }
}

/// UNTIL may be UTC (`...Z`), floating (interpreted in the event's zone) or a
/// plain date (inclusive of that whole day).
fn parse_until(value: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Some(utc) = value.strip_suffix('Z') {
        return NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .ok()
            .map(|dt| dt.and_utc());
    }
    if value.contains('T') {
        return NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
            .ok()
            .map(|dt| localize(tz, dt).with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|dt| localize(tz, dt).with_timezone(&Utc))
}

fn parse_int_list<T: std::str::FromStr>(
    value: &str,
    part: &str,
    corrections: &mut Vec<RuleCorrection>,
) -> Vec<T> {
    let mut values = Vec::new();
    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item.parse() {
            Ok(v) => values.push(v),
            Err(_) => corrections.push(RuleCorrection::DroppedPart(part.to_string())),
        }
    }
    values
}

fn join_ints<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
