//! Core engine for feedsync.
//!
//! Turns iCal feeds into published events and keeps them reconciled:
//! - `ics` and `recurrence` parse feeds and expand recurring events
//! - `occurrence` gives every instance a stable identity
//! - `sync` diffs a source's desired occurrences against its records
//! - `scheduler` runs all active sources in chunks, isolated from each other
//! - `upload` previews and imports one-off calendar files

pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod feed;
pub mod ics;
pub mod materialized;
pub mod metadata;
pub mod occurrence;
pub mod publisher;
pub mod recurrence;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod sync;
pub mod upload;

pub use config::FeedSyncConfig;
pub use error::{FeedSyncError, FeedSyncResult};
pub use event::RawFeedEvent;
pub use feed::{FeedFetcher, HttpFeedFetcher, StaticFeeds};
pub use materialized::MaterializedEvent;
pub use metadata::{EventMetadata, PublishedEvent};
pub use occurrence::{ExpandedOccurrence, KnownOccurrences, OccurrenceId};
pub use publisher::Publisher;
pub use scheduler::{BatchRunner, RunLock, RunOutcome, RunSettings, run_daemon};
pub use source::{FeedSource, GroupId, SourceId};
pub use store::Store;
