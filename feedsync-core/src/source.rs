//! Feed subscriptions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metadata::EventMetadata;

/// Opaque identifier of a feed subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new() -> Self {
        SourceId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        SourceId(id.to_string())
    }
}

/// Identifier of the publisher group events are attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        GroupId(id.to_string())
    }
}

/// A subscribed calendar feed and the metadata applied to everything imported from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSource {
    pub id: SourceId,
    pub url: String,
    pub group_id: GroupId,
    #[serde(default)]
    pub defaults: EventMetadata,
    #[serde(default = "default_active")]
    pub active: bool,
    /// User that registered the subscription, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

fn default_active() -> bool {
    true
}

impl FeedSource {
    pub fn new(url: &str, group_id: GroupId, defaults: EventMetadata) -> Self {
        FeedSource {
            id: SourceId::new(),
            url: url.to_string(),
            group_id,
            defaults,
            active: true,
            owner: None,
        }
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.url)
    }
}
