//! feedsync configuration at ~/.config/feedsync/config.toml

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_FILTER_DAYS_AFTER, DEFAULT_FILTER_DAYS_BEFORE, DEFAULT_LANGUAGE,
    DEFAULT_MAX_OCCURRENCES, DEFAULT_SOURCE_CHUNK_SIZE, DEFAULT_TIMEZONE,
};
use crate::error::{FeedSyncError, FeedSyncResult};
use crate::ics::ParseOptions;
use crate::metadata::{PublishDefaults, Visibility};
use crate::occurrence::ExpansionOptions;

static DEFAULT_DATA_DIR: &str = "~/.local/share/feedsync";

/// Durations written the humantime way (`"30s"`, `"1h"`).
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Extra attempts after a transient failure
    pub retries: u32,
    #[serde(with = "duration_str")]
    pub retry_backoff: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            timeout: Duration::from_secs(30),
            retries: 2,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            url: None,
            token: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Global configuration.
///
/// Every key is optional; `FEEDSYNC__*` environment variables override the
/// file (`FEEDSYNC__PUBLISHER__URL` sets `publisher.url`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSyncConfig {
    pub data_dir: PathBuf,
    /// Upper bound on instances expanded per recurring event.
    pub max_uploaded_event_occurrences: u32,
    pub default_timezone: Tz,
    pub filter_days_before: i64,
    pub filter_days_after: i64,
    #[serde(with = "duration_str")]
    pub sync_interval: Duration,
    pub source_chunk_size: usize,
    pub source_concurrency: usize,
    /// Delete the publisher's event too when an occurrence leaves its feed.
    pub retire_remote_events: bool,
    pub default_language: String,
    pub default_visibility: Visibility,
    pub fetch: FetchConfig,
    pub publisher: PublisherConfig,
}

impl Default for FeedSyncConfig {
    fn default() -> Self {
        FeedSyncConfig {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            max_uploaded_event_occurrences: DEFAULT_MAX_OCCURRENCES,
            default_timezone: DEFAULT_TIMEZONE,
            filter_days_before: DEFAULT_FILTER_DAYS_BEFORE,
            filter_days_after: DEFAULT_FILTER_DAYS_AFTER,
            sync_interval: Duration::from_secs(60 * 60),
            source_chunk_size: DEFAULT_SOURCE_CHUNK_SIZE,
            source_concurrency: 1,
            retire_remote_events: false,
            default_language: DEFAULT_LANGUAGE.to_string(),
            default_visibility: Visibility::Public,
            fetch: FetchConfig::default(),
            publisher: PublisherConfig::default(),
        }
    }
}

impl FeedSyncConfig {
    pub fn config_path() -> FeedSyncResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| FeedSyncError::Config("Could not determine config directory".into()))?
            .join("feedsync");

        Ok(config_dir.join("config.toml"))
    }

    /// Load from the default location, writing a commented template first if
    /// there is no config file yet.
    pub fn load() -> FeedSyncResult<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            Self::create_default_config(&path)?;
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> FeedSyncResult<Self> {
        let config: FeedSyncConfig = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("FEEDSYNC")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| FeedSyncError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| FeedSyncError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> FeedSyncResult<()> {
        if self.max_uploaded_event_occurrences == 0 {
            return Err(FeedSyncError::Config(
                "max_uploaded_event_occurrences must be at least 1".into(),
            ));
        }
        if self.source_chunk_size == 0 {
            return Err(FeedSyncError::Config("source_chunk_size must be at least 1".into()));
        }
        if self.source_concurrency == 0 {
            return Err(FeedSyncError::Config("source_concurrency must be at least 1".into()));
        }
        if self.sync_interval.is_zero() {
            return Err(FeedSyncError::Config("sync_interval must not be zero".into()));
        }
        Ok(())
    }

    pub fn data_path(&self) -> PathBuf {
        let full_path_str = shellexpand::tilde(&self.data_dir.to_string_lossy()).into_owned();
        PathBuf::from(full_path_str)
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            default_timezone: self.default_timezone,
            filter_days_before: Some(self.filter_days_before),
            filter_days_after: Some(self.filter_days_after),
        }
    }

    pub fn expansion_options(&self) -> ExpansionOptions {
        ExpansionOptions {
            max_occurrences: self.max_uploaded_event_occurrences,
        }
    }

    pub fn publish_defaults(&self) -> PublishDefaults {
        PublishDefaults {
            language: self.default_language.clone(),
            visibility: self.default_visibility,
        }
    }

    /// The effective configuration as TOML, secrets masked.
    pub fn to_toml(&self) -> FeedSyncResult<String> {
        let mut shown = self.clone();
        if shown.publisher.token.is_some() {
            shown.publisher.token = Some("********".into());
        }
        toml::to_string_pretty(&shown).map_err(|e| FeedSyncError::Config(e.to_string()))
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> FeedSyncResult<()> {
        let contents = format!(
            "\
# feedsync configuration

# Where sources and published events are recorded:
# data_dir = \"{DEFAULT_DATA_DIR}\"

# How often the daemon reconciles all active sources:
# sync_interval = \"1h\"

# Upper bound on instances expanded per recurring event:
# max_uploaded_event_occurrences = {DEFAULT_MAX_OCCURRENCES}

# Zone for floating and all-day times:
# default_timezone = \"Europe/Berlin\"

# Single events outside [now - before, now + after] days are ignored:
# filter_days_before = {DEFAULT_FILTER_DAYS_BEFORE}
# filter_days_after = {DEFAULT_FILTER_DAYS_AFTER}

# Sources loaded per batch, and processed at the same time:
# source_chunk_size = {DEFAULT_SOURCE_CHUNK_SIZE}
# source_concurrency = 1

# Also delete the published event when an occurrence leaves its feed:
# retire_remote_events = false

# default_language = \"{DEFAULT_LANGUAGE}\"
# default_visibility = \"PUBLIC\"

# [fetch]
# timeout = \"30s\"
# retries = 2
# retry_backoff = \"2s\"

# [publisher]
# url = \"https://events.example.org/api/feedsync\"
# token = \"...\"
# timeout = \"10s\"
"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FeedSyncError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| FeedSyncError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}
