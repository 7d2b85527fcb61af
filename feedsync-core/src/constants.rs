/// Upper bound on occurrences produced from a single recurring event.
pub const DEFAULT_MAX_OCCURRENCES: u32 = 365;

/// Sources loaded from the store per batch.
pub const DEFAULT_SOURCE_CHUNK_SIZE: usize = 20;

/// Zone for floating and all-day times.
pub const DEFAULT_TIMEZONE: chrono_tz::Tz = chrono_tz::Europe::Berlin;

pub const DEFAULT_FILTER_DAYS_BEFORE: i64 = 1;
pub const DEFAULT_FILTER_DAYS_AFTER: i64 = 365;

pub const DEFAULT_LANGUAGE: &str = "de";

/// Title used for events that arrive without a SUMMARY.
pub const UNTITLED_EVENT: &str = "(No title)";

/// Separator between the feed UID and the occurrence timestamp in synthetic ids.
pub const OCCURRENCE_ID_SEPARATOR: &str = "__";

/// Canonical timestamp layout used inside synthetic occurrence ids.
pub const OCCURRENCE_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";
