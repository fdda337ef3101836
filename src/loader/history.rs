//! Most recent fetch per source

use crate::models::FetchHistory;
use dashmap::DashMap;
use std::collections::HashMap;

/// In-memory cache of the latest fetch of every source
#[derive(Debug, Default)]
pub struct FetchHistoryCache {
    latest: DashMap<i64, FetchHistory>,
}

impl FetchHistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from the store's latest-fetch view
    pub fn load(latest: HashMap<i64, FetchHistory>) -> Self {
        let cache = Self::new();
        for (source_id, history) in latest {
            cache.latest.insert(source_id, history);
        }
        cache
    }

    /// Remember a fetch unless a newer one is already known
    pub fn record(&self, history: FetchHistory) {
        self.latest
            .entry(history.source_id)
            .and_modify(|known| {
                if history.fetched_at >= known.fetched_at {
                    *known = history.clone();
                }
            })
            .or_insert_with(|| history.clone());
    }

    pub fn get(&self, source_id: i64) -> Option<FetchHistory> {
        self.latest.get(&source_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
