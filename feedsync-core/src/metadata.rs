//! Publishing metadata: source defaults, per-event overrides and the payload
//! sent to the publisher.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::occurrence::ExpandedOccurrence;
use crate::source::GroupId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Tentative,
    Confirmed,
    Cancelled,
}

impl EventStatus {
    /// Parse an ICS STATUS value. Unknown values yield `None` so they never
    /// override a source default.
    pub fn from_ics_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TENTATIVE" => Some(EventStatus::Tentative),
            "CONFIRMED" => Some(EventStatus::Confirmed),
            "CANCELLED" => Some(EventStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinOptions {
    /// Anyone can join and is accepted automatically
    Free,
    /// Participation needs manual approval
    Restricted,
    /// Participants must be invited
    Invite,
    /// Registration happens on an external site
    External,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Restricted,
    Private,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Visibility::Public => "PUBLIC",
            Visibility::Unlisted => "UNLISTED",
            Visibility::Restricted => "RESTRICTED",
            Visibility::Private => "PRIVATE",
        };
        write!(f, "{s}")
    }
}

/// Sparse set of publishing fields.
///
/// Used both for the defaults configured on a feed source and for the
/// per-event values found in the feed itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EventStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_options: Option<JoinOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_participation_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_address: Option<String>,
    /// Passed through to the publisher untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_address: Option<serde_json::Value>,
}

impl EventMetadata {
    /// Merge `self` over `defaults`: every field present here wins.
    pub fn overlay(&self, defaults: &EventMetadata) -> EventMetadata {
        EventMetadata {
            description: self.description.clone().or_else(|| defaults.description.clone()),
            category: self.category.clone().or_else(|| defaults.category.clone()),
            status: self.status.or(defaults.status),
            join_options: self.join_options.or(defaults.join_options),
            external_participation_url: self
                .external_participation_url
                .clone()
                .or_else(|| defaults.external_participation_url.clone()),
            language: self.language.clone().or_else(|| defaults.language.clone()),
            visibility: self.visibility.or(defaults.visibility),
            tags: self.tags.clone().or_else(|| defaults.tags.clone()),
            online_address: self
                .online_address
                .clone()
                .or_else(|| defaults.online_address.clone()),
            physical_address: self
                .physical_address
                .clone()
                .or_else(|| defaults.physical_address.clone()),
        }
    }
}

/// Fallbacks for fields neither the feed nor the source provides.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishDefaults {
    pub language: String,
    pub visibility: Visibility,
}

impl Default for PublishDefaults {
    fn default() -> Self {
        PublishDefaults {
            language: crate::constants::DEFAULT_LANGUAGE.to_string(),
            visibility: Visibility::Public,
        }
    }
}

/// Payload for creating one event on the publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedEvent {
    pub begins_on: DateTime<FixedOffset>,
    pub ends_on: DateTime<FixedOffset>,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_options: Option<JoinOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_participation_url: Option<String>,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<EventStatus>,
    pub visibility: Visibility,
    pub tags: Vec<String>,
    pub attributed_to_id: GroupId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_address: Option<serde_json::Value>,
}

impl PublishedEvent {
    pub fn build(
        occurrence: &ExpandedOccurrence,
        source_defaults: &EventMetadata,
        group: &GroupId,
        defaults: &PublishDefaults,
    ) -> Self {
        let merged = occurrence.overrides.overlay(source_defaults);

        // The external URL only means something for externally managed registration.
        let external_participation_url = match merged.join_options {
            Some(JoinOptions::External) => merged.external_participation_url,
            _ => None,
        };

        PublishedEvent {
            begins_on: occurrence.start.fixed_offset(),
            ends_on: occurrence.end.fixed_offset(),
            title: occurrence.summary.clone(),
            description: merged
                .description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| occurrence.summary.clone()),
            category: merged.category,
            join_options: merged.join_options,
            external_participation_url,
            language: merged.language.unwrap_or_else(|| defaults.language.clone()),
            status: merged.status,
            visibility: merged.visibility.unwrap_or(defaults.visibility),
            tags: merged.tags.unwrap_or_default(),
            attributed_to_id: group.clone(),
            online_address: merged.online_address,
            physical_address: merged.physical_address,
        }
    }
}
