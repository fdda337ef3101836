//! Shared helpers for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newsdesk::models::{ContentSource, NewsDraft, SourceType};
use newsdesk::search::{
    FieldDef, FieldPolicy, FieldType, IndexTypeSpec, IndexableRecord, RecordProvider,
    SearchConfig, SearchConfigBuilder,
};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Poll `check` until it returns true or `timeout` passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// In-memory search config with a short reindex pause
pub fn test_search_config() -> SearchConfig {
    SearchConfigBuilder::new()
        .in_memory()
        .writer_heap_size(15_000_000)
        .reindex_chunk_delay(Duration::from_millis(10))
        .build()
}

/// A small type used by the index and search tests
pub fn note_type() -> IndexTypeSpec {
    IndexTypeSpec::new("note", note_fields())
}

pub fn note_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::text("title").with_boost(2.0),
        FieldDef::text("body"),
        FieldDef::keyword("tag"),
        FieldDef::new("rank", FieldType::I64, FieldPolicy::SORTABLE),
        FieldDef::new("published", FieldType::Date, FieldPolicy::SORTABLE),
    ]
}

pub fn note(id: &str, title: &str, body: &str) -> IndexableRecord {
    IndexableRecord::insert(id)
        .with_locale(Some("en"))
        .with_field("title", title)
        .with_field("body", body)
}

/// Record provider yielding `total` generated notes
pub struct CountingProvider {
    pub total: usize,
    pub calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(total: usize) -> Arc<Self> {
        Arc::new(Self {
            total,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordProvider for CountingProvider {
    async fn fetch_chunk(
        &self,
        offset: usize,
        limit: usize,
    ) -> newsdesk::Result<Vec<IndexableRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let end = self.total.min(offset + limit);
        Ok((offset..end)
            .map(|i| {
                note(&i.to_string(), &format!("Generated note {i}"), "Reindexed body")
                    .with_field("rank", i as i64)
            })
            .collect())
    }
}

pub fn source(id: i64, interval_secs: u64) -> ContentSource {
    ContentSource {
        id,
        name: format!("source-{id}"),
        source_type: SourceType::JsonFeed,
        url: format!("http://localhost/feeds/{id}.json"),
        category_id: 1,
        locale: Some("en".to_string()),
        fetch_interval_secs: interval_secs,
        enabled: true,
    }
}

pub fn draft(
    link: &str,
    category_id: i64,
    locale: &str,
    title: &str,
    text: &str,
    publish_date: DateTime<Utc>,
) -> NewsDraft {
    NewsDraft {
        provider_id: 1,
        category_id,
        title: title.to_string(),
        locale: Some(locale.to_string()),
        text: text.to_string(),
        publish_date,
        link: link.to_string(),
        image_url: None,
        image_width: None,
        image_height: None,
    }
}
