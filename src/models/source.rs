use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};

/// Format of an external content source, used to pick a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceType {
    JsonFeed,
    Rss,
    Html,
}

/// An external source polled on a fixed interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSource {
    /// Unique identifier
    pub id: i64,

    /// Display name
    pub name: String,

    /// Reader selector
    pub source_type: SourceType,

    /// Endpoint to poll
    pub url: String,

    /// Category assigned to every item from this source
    pub category_id: i64,

    /// Default language of the source's items
    #[serde(default)]
    pub locale: Option<String>,

    /// Polling interval in seconds
    pub fetch_interval_secs: u64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ContentSource {
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_secs)
    }
}

/// Outcome of one completed fetch of a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchHistory {
    pub source_id: i64,
    pub fetched_at: DateTime<Utc>,
    pub success: bool,
}

impl FetchHistory {
    pub fn new(source_id: i64, fetched_at: DateTime<Utc>, success: bool) -> Self {
        Self {
            source_id,
            fetched_at,
            success,
        }
    }
}
