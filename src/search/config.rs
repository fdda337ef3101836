//! Search configuration

use crate::search::analyzers::AnalyzerLanguage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Search index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Path to the search index directory; the index lives in RAM when unset
    #[serde(default)]
    pub index_path: Option<PathBuf>,

    /// Index writer heap size in bytes (default: 50MB)
    pub writer_heap_size: usize,

    /// Records per chunk during a full reindex
    pub reindex_chunk_size: usize,

    /// Pause between reindex chunks in milliseconds
    pub reindex_chunk_delay_ms: u64,

    /// Pending batches above which the indexing queue logs a warning
    pub queue_warn_threshold: usize,

    /// Locale tag to analyzer language
    pub locales: BTreeMap<String, AnalyzerLanguage>,
}

impl SearchConfig {
    pub fn reindex_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.reindex_chunk_delay_ms)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        let mut locales = BTreeMap::new();
        locales.insert("en".to_string(), AnalyzerLanguage::English);
        locales.insert("de".to_string(), AnalyzerLanguage::German);

        Self {
            index_path: None,
            writer_heap_size: 50_000_000, // 50MB
            reindex_chunk_size: 200,
            reindex_chunk_delay_ms: 5_000,
            queue_warn_threshold: 10,
            locales,
        }
    }
}

/// Builder for SearchConfig
pub struct SearchConfigBuilder {
    config: SearchConfig,
}

impl SearchConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SearchConfig::default(),
        }
    }

    pub fn index_path(mut self, path: PathBuf) -> Self {
        self.config.index_path = Some(path);
        self
    }

    pub fn in_memory(mut self) -> Self {
        self.config.index_path = None;
        self
    }

    pub fn writer_heap_size(mut self, size: usize) -> Self {
        self.config.writer_heap_size = size;
        self
    }

    pub fn reindex_chunk_size(mut self, size: usize) -> Self {
        self.config.reindex_chunk_size = size;
        self
    }

    pub fn reindex_chunk_delay(mut self, delay: Duration) -> Self {
        self.config.reindex_chunk_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn queue_warn_threshold(mut self, threshold: usize) -> Self {
        self.config.queue_warn_threshold = threshold;
        self
    }

    pub fn locale(mut self, tag: impl Into<String>, language: AnalyzerLanguage) -> Self {
        self.config.locales.insert(tag.into(), language);
        self
    }

    pub fn build(self) -> SearchConfig {
        self.config
    }
}

impl Default for SearchConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
