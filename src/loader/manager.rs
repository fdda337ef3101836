//! Per-source fetch scheduling and persistence of fetched items

use crate::loader::config::LoaderConfig;
use crate::loader::error::{LoaderError, LoaderResult};
use crate::loader::history::FetchHistoryCache;
use crate::loader::metrics::LOADER_METRICS;
use crate::loader::reader::ReaderRegistry;
use crate::loader::schedule::{FetchSchedule, ScheduleEntry};
use crate::models::{ContentSource, FetchHistory, NewsDraft};
use crate::news::news_record;
use crate::search::{IndexManager, IndexMutationBatch, IndexTypeSpec, Operation};
use crate::state::{NewsStore, SourceStore, UpsertOutcome};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything the scheduling, fetch and saving tasks share
struct LoaderShared {
    config: LoaderConfig,
    sources: Arc<dyn SourceStore>,
    news: Arc<dyn NewsStore>,
    index: Arc<IndexManager>,
    news_type: Arc<IndexTypeSpec>,
    readers: ReaderRegistry,
    schedule: FetchSchedule,
    history: FetchHistoryCache,
    pending: Mutex<Vec<NewsDraft>>,
    pending_ready: Notify,
    workers: Arc<Semaphore>,
    shut_down: AtomicBool,
}

/// Polls content sources on their intervals and saves what they return
///
/// One scheduling task pops due sources and hands each to a fetch task, at
/// most `max_workers` at a time. Fetched drafts collect in a pending list
/// that one saving task drains into the store and the index.
pub struct ContentLoaderManager {
    shared: Arc<LoaderShared>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ContentLoaderManager {
    /// Load enabled sources and their last fetches, then start polling
    pub async fn start(
        config: LoaderConfig,
        sources: Arc<dyn SourceStore>,
        news: Arc<dyn NewsStore>,
        index: Arc<IndexManager>,
        news_type: Arc<IndexTypeSpec>,
        readers: ReaderRegistry,
    ) -> LoaderResult<Self> {
        if config.max_workers == 0 {
            return Err(LoaderError::ConfigurationError(
                "max_workers must be positive".to_string(),
            ));
        }

        let history = FetchHistoryCache::load(sources.latest_fetches().await?);
        let schedule = FetchSchedule::new();
        for source in sources.list_sources().await? {
            if source.enabled {
                let last_fetch = history.get(source.id);
                schedule.insert(ScheduleEntry::new(source, last_fetch));
            }
        }
        LOADER_METRICS.schedule_size.set(schedule.len() as f64);

        info!(
            sources = schedule.len(),
            max_workers = config.max_workers,
            "Starting content loader"
        );

        let shared = Arc::new(LoaderShared {
            workers: Arc::new(Semaphore::new(config.max_workers)),
            config,
            sources,
            news,
            index,
            news_type,
            readers,
            schedule,
            history,
            pending: Mutex::new(Vec::new()),
            pending_ready: Notify::new(),
            shut_down: AtomicBool::new(false),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduling = tokio::spawn(run_scheduling(shared.clone(), shutdown_rx.clone()));
        let saving = tokio::spawn(run_saving(shared.clone(), shutdown_rx));

        Ok(Self {
            shared,
            shutdown_tx,
            tasks: Mutex::new(vec![scheduling, saving]),
        })
    }

    /// Persist a new source and schedule it right away if enabled
    pub async fn add_source(&self, source: ContentSource) -> LoaderResult<()> {
        if self.is_shut_down() {
            return Err(LoaderError::ShutDown);
        }
        self.shared.sources.add_source(source.clone()).await?;
        if source.enabled {
            info!(source_id = source.id, name = %source.name, "Scheduling new source");
            let last_fetch = self.shared.history.get(source.id);
            self.shared.schedule.insert(ScheduleEntry::new(source, last_fetch));
            LOADER_METRICS
                .schedule_size
                .set(self.shared.schedule.len() as f64);
        }
        Ok(())
    }

    /// Waiting sources in fetch order; sources being fetched are not included
    pub fn schedule_snapshot(&self) -> Vec<ScheduleEntry> {
        self.shared.schedule.snapshot()
    }

    pub fn last_fetch(&self, source_id: i64) -> Option<FetchHistory> {
        self.shared.history.get(source_id)
    }

    /// Fetched items not yet saved
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::SeqCst)
    }

    /// Stop scheduling and saving; results of fetches still running are dropped
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down content loader");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for ContentLoaderManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_scheduling(shared: Arc<LoaderShared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let entry = tokio::select! {
            entry = shared.schedule.next_due() => entry,
            _ = shutdown.changed() => break,
        };
        LOADER_METRICS.schedule_size.set(shared.schedule.len() as f64);

        let permit = tokio::select! {
            permit = shared.workers.clone().acquire_owned() => permit,
            _ = shutdown.changed() => break,
        };
        let Ok(permit) = permit else {
            break;
        };

        let task_shared = shared.clone();
        tokio::spawn(async move {
            let _permit = permit;
            task_shared.fetch(entry).await;
        });
    }
    debug!("Scheduling task stopped");
}

async fn run_saving(shared: Arc<LoaderShared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shared.pending_ready.notified() => {}
            _ = shutdown.changed() => break,
        }

        let drafts = std::mem::take(&mut *shared.pending.lock());
        LOADER_METRICS.pending_items.set(0.0);
        if !drafts.is_empty() {
            shared.save(drafts).await;
        }
    }
    debug!("Saving task stopped");
}

impl LoaderShared {
    async fn fetch(&self, entry: ScheduleEntry) {
        let source = entry.source;
        let source_type = source.source_type.to_string();
        let fetched_at = Utc::now();
        let started = Instant::now();

        let result = match self.readers.get(source.source_type) {
            Some(reader) => reader.read(&source, entry.last_fetch.as_ref()).await,
            None => Err(LoaderError::ReaderNotFound(source.source_type)),
        };

        if self.shut_down.load(Ordering::SeqCst) {
            debug!(source_id = source.id, "Discarding fetch result after shutdown");
            return;
        }

        let elapsed = started.elapsed().as_secs_f64();
        let success = match result {
            Ok(drafts) => {
                LOADER_METRICS.record_fetch(&source_type, "success", elapsed);
                debug!(source_id = source.id, items = drafts.len(), "Fetched source");
                self.enqueue(drafts);
                true
            }
            Err(e) => {
                LOADER_METRICS.record_fetch(&source_type, e.kind(), elapsed);
                warn!(
                    source_id = source.id,
                    url = %source.url,
                    error = %e,
                    "Failed to fetch source"
                );
                false
            }
        };

        let history = FetchHistory::new(source.id, fetched_at, success);
        if let Err(e) = self.sources.record_fetch(history.clone()).await {
            error!(source_id = source.id, error = %e, "Failed to record fetch history");
        }
        self.history.record(history.clone());
        self.schedule.insert(ScheduleEntry::new(source, Some(history)));
        LOADER_METRICS.schedule_size.set(self.schedule.len() as f64);
    }

    fn enqueue(&self, drafts: Vec<NewsDraft>) {
        if drafts.is_empty() {
            return;
        }
        let pending = {
            let mut pending = self.pending.lock();
            pending.extend(drafts);
            pending.len()
        };
        LOADER_METRICS.pending_items.set(pending as f64);
        if pending > self.config.pending_warn_threshold {
            warn!(
                pending,
                threshold = self.config.pending_warn_threshold,
                "Fetched items are piling up"
            );
        }
        self.pending_ready.notify_one();
    }

    /// Upsert each draft and index what changed as one batch
    async fn save(&self, drafts: Vec<NewsDraft>) {
        let mut records = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let link = draft.link.clone();
            match self.news.upsert_news(draft).await {
                Ok(upserted) => {
                    let operation = match upserted.outcome {
                        UpsertOutcome::Created => Some(Operation::Insert),
                        UpsertOutcome::Updated => Some(Operation::Update),
                        // never made it into the index last time
                        UpsertOutcome::Unchanged if !upserted.news.indexed => {
                            Some(Operation::Update)
                        }
                        UpsertOutcome::Unchanged => None,
                    };
                    LOADER_METRICS
                        .saved_items_total
                        .with_label_values(&[outcome_label(upserted.outcome)])
                        .inc();
                    if let Some(operation) = operation {
                        records.push(news_record(&upserted.news, operation));
                    }
                }
                Err(e) => {
                    LOADER_METRICS
                        .saved_items_total
                        .with_label_values(&["failed"])
                        .inc();
                    warn!(link = %link, error = %e, "Failed to save fetched item");
                }
            }
        }

        if records.is_empty() {
            return;
        }
        let count = records.len();
        match self
            .index
            .index(IndexMutationBatch::new(self.news_type.clone(), records))
        {
            Ok(()) => debug!(count, "Queued saved news for indexing"),
            Err(e) => error!(count, error = %e, "Failed to queue saved news for indexing"),
        }
    }
}

fn outcome_label(outcome: UpsertOutcome) -> &'static str {
    match outcome {
        UpsertOutcome::Created => "created",
        UpsertOutcome::Updated => "updated",
        UpsertOutcome::Unchanged => "unchanged",
    }
}
