//! Configuration for near-duplicate grouping

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the news grouper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Whether committed news are grouped at all
    pub enabled: bool,

    /// Similarity score a candidate needs to join a group
    pub min_score: f32,

    /// Candidates must be published within this many seconds of the item
    pub publish_window_secs: u64,

    /// Delay before a failed item is grouped again, in milliseconds
    pub retry_delay_ms: u64,

    /// Queued items above which a warning is logged
    pub queue_warn_threshold: usize,
}

impl GroupingConfig {
    pub fn publish_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.publish_window_secs as i64)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_score: 1.2,
            publish_window_secs: 3 * 60 * 60,
            retry_delay_ms: 60_000,
            queue_warn_threshold: 10,
        }
    }
}

/// Builder for GroupingConfig
pub struct GroupingConfigBuilder {
    config: GroupingConfig,
}

impl GroupingConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: GroupingConfig::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn min_score(mut self, min_score: f32) -> Self {
        self.config.min_score = min_score;
        self
    }

    pub fn publish_window(mut self, window: Duration) -> Self {
        self.config.publish_window_secs = window.as_secs();
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn queue_warn_threshold(mut self, threshold: usize) -> Self {
        self.config.queue_warn_threshold = threshold;
        self
    }

    pub fn build(self) -> GroupingConfig {
        self.config
    }
}

impl Default for GroupingConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
