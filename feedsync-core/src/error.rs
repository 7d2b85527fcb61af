//! Error types for the feedsync engine.

use thiserror::Error;

use crate::source::{GroupId, SourceId};

/// Errors that can occur while importing and reconciling feeds.
#[derive(Error, Debug)]
pub enum FeedSyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed '{url}' unreachable: {reason}")]
    FeedUnreachable { url: String, reason: String },

    #[error("Feed '{0}' is not valid UTF-8")]
    FeedEncoding(String),

    #[error("ICS parse error: {0}")]
    IcsParse(String),

    #[error("Invalid recurrence for event '{uid}': {reason}")]
    Recurrence { uid: String, reason: String },

    #[error("Group {0} does not exist on the publisher")]
    GroupNotFound(GroupId),

    #[error("Feed source not found: {0}")]
    SourceNotFound(SourceId),

    #[error("Publisher error: {0}")]
    Publisher(String),

    #[error("Publisher request timed out after {0}s")]
    PublisherTimeout(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Result type alias for feedsync operations.
pub type FeedSyncResult<T> = Result<T, FeedSyncError>;
