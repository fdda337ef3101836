//! Configuration for the content loader

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the content loader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Whether sources are polled at all
    pub enabled: bool,

    /// Maximum number of concurrent fetches
    pub max_workers: usize,

    /// Connect timeout for source requests in milliseconds
    pub connect_timeout_ms: u64,

    /// Whole-request timeout for source requests in milliseconds
    pub read_timeout_ms: u64,

    /// User agent sent to sources
    pub user_agent: String,

    /// Pending saved items above which a warning is logged
    pub pending_warn_threshold: usize,
}

impl LoaderConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: 5,
            connect_timeout_ms: 2_000,
            read_timeout_ms: 30_000,
            user_agent: concat!("newsdesk/", env!("CARGO_PKG_VERSION")).to_string(),
            pending_warn_threshold: 1_000,
        }
    }
}

/// Builder for LoaderConfig
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LoaderConfig::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.config.max_workers = workers;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn pending_warn_threshold(mut self, threshold: usize) -> Self {
        self.config.pending_warn_threshold = threshold;
        self
    }

    pub fn build(self) -> LoaderConfig {
        self.config
    }
}

impl Default for LoaderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.max_workers, 5);
        assert_eq!(config.connect_timeout(), Duration::from_secs(2));
        assert_eq!(config.read_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_builder() {
        let config = LoaderConfigBuilder::new()
            .max_workers(2)
            .read_timeout(Duration::from_millis(500))
            .build();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.read_timeout_ms, 500);
    }
}
