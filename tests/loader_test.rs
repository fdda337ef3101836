//! Integration tests for the content loader

mod common;

use async_trait::async_trait;
use chrono::Utc;
use common::*;
use newsdesk::config::Config;
use newsdesk::loader::{LoaderError, LoaderResult, ReaderRegistry, SourceReader};
use newsdesk::models::{ContentSource, FetchHistory, NewsDraft, SourceType};
use newsdesk::search::SearchOptions;
use newsdesk::state::{InMemoryStore, NewsStore, SourceStore};
use newsdesk::Pipeline;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

/// Reader returning two fixed items per source, or failing
struct ScriptedReader {
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    delay: Duration,
    fail: bool,
}

impl ScriptedReader {
    fn new(delay: Duration, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            delay,
            fail,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceReader for ScriptedReader {
    fn source_type(&self) -> SourceType {
        SourceType::JsonFeed
    }

    async fn read(
        &self,
        source: &ContentSource,
        _last_fetch: Option<&FetchHistory>,
    ) -> LoaderResult<Vec<NewsDraft>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(LoaderError::Http("connection refused".to_string()));
        }
        Ok((0..2)
            .map(|i| {
                draft(
                    &format!("https://source-{}/story-{i}", source.id),
                    source.category_id,
                    "en",
                    &format!("Glacier report {i} from source {}", source.id),
                    "Meltwater levels rising",
                    Utc::now(),
                )
            })
            .collect())
    }
}

fn loader_config() -> Config {
    let mut config = Config::default();
    config.search = test_search_config();
    config.grouping.enabled = false;
    config
}

async fn start(
    config: Config,
    store: &Arc<InMemoryStore>,
    readers: ReaderRegistry,
) -> Pipeline {
    Pipeline::start(config, store.clone(), store.clone(), readers)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_fetched_items_are_saved_and_indexed() {
    let store = Arc::new(InMemoryStore::new());
    store.add_source(source(1, 3600)).await.unwrap();
    let reader = ScriptedReader::new(Duration::ZERO, false);
    let pipeline = start(
        loader_config(),
        &store,
        ReaderRegistry::new().with_reader(reader.clone()),
    )
    .await;

    let store_ref = &store;
    assert!(
        wait_until(WAIT, move || async move {
            let page = store_ref.list_news_page(0, 10).await.unwrap();
            page.len() == 2 && page.iter().all(|news| news.indexed)
        })
        .await
    );

    let response = pipeline
        .searcher()
        .search_text("glacier", pipeline.news_type(), Some("en"), &SearchOptions::default())
        .unwrap();
    assert_eq!(response.total_hits, 2);

    let loader = pipeline.loader().unwrap();
    assert!(
        wait_until(WAIT, move || async move {
            let snapshot = loader.schedule_snapshot();
            snapshot.len() == 1 && snapshot[0].last_fetch.is_some()
        })
        .await
    );
    assert!(loader.last_fetch(1).unwrap().success);
    assert_eq!(reader.calls(), 1);
    assert_eq!(store.fetch_count(), 1);

    pipeline.shutdown().unwrap();
}

#[tokio::test]
async fn test_failed_fetch_is_recorded_and_rescheduled() {
    let store = Arc::new(InMemoryStore::new());
    store.add_source(source(1, 3600)).await.unwrap();
    let reader = ScriptedReader::new(Duration::ZERO, true);
    let pipeline = start(
        loader_config(),
        &store,
        ReaderRegistry::new().with_reader(reader),
    )
    .await;
    let loader = pipeline.loader().unwrap();

    assert!(wait_until(WAIT, move || async move { loader.last_fetch(1).is_some() }).await);
    assert!(!loader.last_fetch(1).unwrap().success);
    assert!(
        wait_until(WAIT, move || async move { loader.schedule_snapshot().len() == 1 }).await
    );
    assert_eq!(store.news_count(), 0);
    assert!(!store.latest_fetches().await.unwrap()[&1].success);

    pipeline.shutdown().unwrap();
}

#[tokio::test]
async fn test_missing_reader_counts_as_failed_fetch() {
    let store = Arc::new(InMemoryStore::new());
    let mut rss = source(7, 3600);
    rss.source_type = SourceType::Rss;
    store.add_source(rss).await.unwrap();

    let pipeline = start(
        loader_config(),
        &store,
        ReaderRegistry::new().with_reader(ScriptedReader::new(Duration::ZERO, false)),
    )
    .await;
    let loader = pipeline.loader().unwrap();

    assert!(wait_until(WAIT, move || async move { loader.last_fetch(7).is_some() }).await);
    assert!(!loader.last_fetch(7).unwrap().success);

    pipeline.shutdown().unwrap();
}

#[tokio::test]
async fn test_added_source_preempts_waiting_schedule() {
    let store = Arc::new(InMemoryStore::new());
    store.add_source(source(1, 3600)).await.unwrap();
    store
        .record_fetch(FetchHistory::new(1, Utc::now(), true))
        .await
        .unwrap();

    let reader = ScriptedReader::new(Duration::ZERO, false);
    let pipeline = start(
        loader_config(),
        &store,
        ReaderRegistry::new().with_reader(reader.clone()),
    )
    .await;
    let loader = pipeline.loader().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(reader.calls(), 0);

    loader.add_source(source(2, 3600)).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(2), move || async move {
            loader
                .schedule_snapshot()
                .iter()
                .any(|entry| entry.source.id == 2 && entry.last_fetch.is_some())
        })
        .await
    );
    assert_eq!(reader.calls(), 1);
    assert!(loader.last_fetch(2).unwrap().success);

    let order: Vec<i64> = loader
        .schedule_snapshot()
        .iter()
        .map(|entry| entry.source.id)
        .collect();
    assert_eq!(order, vec![1, 2]);

    pipeline.shutdown().unwrap();
}

#[tokio::test]
async fn test_concurrent_fetches_are_bounded() {
    let store = Arc::new(InMemoryStore::new());
    for id in 1..=5 {
        store.add_source(source(id, 3600)).await.unwrap();
    }
    let mut config = loader_config();
    config.loader.max_workers = 2;

    let reader = ScriptedReader::new(Duration::from_millis(100), false);
    let pipeline = start(
        config,
        &store,
        ReaderRegistry::new().with_reader(reader.clone()),
    )
    .await;

    let reader_ref = &reader;
    assert!(wait_until(WAIT, move || async move { reader_ref.calls() == 5 }).await);
    assert_eq!(reader.max_running.load(Ordering::SeqCst), 2);

    pipeline.shutdown().unwrap();
}

#[tokio::test]
async fn test_results_after_shutdown_are_discarded() {
    let store = Arc::new(InMemoryStore::new());
    store.add_source(source(1, 3600)).await.unwrap();
    let reader = ScriptedReader::new(Duration::from_millis(300), false);
    let pipeline = start(
        loader_config(),
        &store,
        ReaderRegistry::new().with_reader(reader.clone()),
    )
    .await;

    let reader_ref = &reader;
    assert!(wait_until(WAIT, move || async move { reader_ref.calls() == 1 }).await);
    pipeline.shutdown().unwrap();
    assert!(pipeline.loader().unwrap().is_shut_down());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(store.news_count(), 0);
    assert_eq!(store.fetch_count(), 0);
    assert!(pipeline.loader().unwrap().last_fetch(1).is_none());
}

#[tokio::test]
async fn test_json_feed_source_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    let feed = serde_json::json!({
        "version": "https://jsonfeed.org/version/1.1",
        "title": "Wire",
        "items": [{
            "id": "a",
            "url": "https://wire.example/a",
            "title": "Lighthouse keeper retires",
            "content_text": "After forty years on the rock",
            "date_published": Utc::now().to_rfc3339()
        }]
    });
    server
        .mock("GET", "/feed.json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(feed.to_string())
        .create_async()
        .await;

    let store = Arc::new(InMemoryStore::new());
    let mut wire = source(3, 3600);
    wire.url = format!("{}/feed.json", server.url());
    store.add_source(wire).await.unwrap();

    let config = loader_config();
    let readers = ReaderRegistry::with_defaults(&config.loader).unwrap();
    let pipeline = start(config, &store, readers).await;

    let pipeline_ref = &pipeline;
    assert!(
        wait_until(WAIT, move || async move {
            pipeline_ref
                .searcher()
                .search_text(
                    "lighthouse",
                    pipeline_ref.news_type(),
                    None,
                    &SearchOptions::default(),
                )
                .map(|response| response.total_hits == 1)
                .unwrap_or(false)
        })
        .await
    );

    let news = store.list_news_page(0, 10).await.unwrap();
    assert_eq!(news.len(), 1);
    assert_eq!(news[0].provider_id, 3);
    assert_eq!(news[0].locale.as_deref(), Some("en"));
    assert_eq!(news[0].link, "https://wire.example/a");

    pipeline.shutdown().unwrap();
}
