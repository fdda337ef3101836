//! Owner of the index and its indexing thread

use crate::search::config::SearchConfig;
use crate::search::error::{SearchError, SearchResult};
use crate::search::index::{IndexHandle, SearchIndex};
use crate::search::indexing::{IndexingCommand, IndexingState, IndexingThread};
use crate::search::schema::{IndexMutationBatch, IndexTypeSpec};
use crate::search::service::IndexSearch;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info};

/// Outcome of a full reindex of one type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexSummary {
    /// Batches handed to the indexing thread
    pub batches: usize,
    pub records: usize,
    /// Stopped by shutdown before the provider ran dry
    pub cancelled: bool,
}

/// Orchestrates writes to the single index
///
/// Construct once per process and share it through `Arc`.
pub struct IndexManager {
    config: SearchConfig,
    thread: Arc<IndexingThread>,
    handle: Arc<IndexHandle>,
    shutdown_tx: watch::Sender<bool>,
    reindex_tasks: Mutex<Vec<AbortHandle>>,
    shut_down: AtomicBool,
}

impl IndexManager {
    /// Open the index for `types` and start the indexing thread
    pub fn open(config: SearchConfig, types: &[Arc<IndexTypeSpec>]) -> SearchResult<Self> {
        if config.reindex_chunk_size == 0 {
            return Err(SearchError::InvalidConfiguration(
                "reindex_chunk_size must be positive".to_string(),
            ));
        }

        let index = SearchIndex::open(config.clone(), types)?;
        let handle = index.handle();
        let thread = IndexingThread::spawn(index, config.queue_warn_threshold)?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            thread: Arc::new(thread),
            handle,
            shutdown_tx,
            reindex_tasks: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Queue a batch; returns before it is applied
    pub fn index(&self, batch: IndexMutationBatch) -> SearchResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(SearchError::ShutDown);
        }
        if batch.is_empty() {
            return Ok(());
        }
        self.thread.submit(IndexingCommand::Apply(batch))
    }

    pub fn searcher(&self) -> IndexSearch {
        IndexSearch::new(self.handle.clone())
    }

    pub fn handle(&self) -> Arc<IndexHandle> {
        self.handle.clone()
    }

    pub fn queue_depth(&self) -> usize {
        self.thread.queue_depth()
    }

    pub fn indexing_state(&self) -> IndexingState {
        self.thread.state()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Replace every document of `spec` with what its record provider yields
    ///
    /// Runs on the tokio runtime; the returned handle resolves once the last
    /// chunk was queued, not when it was applied.
    pub fn reindex(
        &self,
        spec: Arc<IndexTypeSpec>,
    ) -> SearchResult<JoinHandle<SearchResult<ReindexSummary>>> {
        if self.is_shut_down() {
            return Err(SearchError::ShutDown);
        }
        if spec.provider().is_none() {
            return Err(SearchError::InvalidConfiguration(format!(
                "type {} has no record provider",
                spec.name
            )));
        }

        let task = ReindexTask {
            thread: self.thread.clone(),
            spec,
            chunk_size: self.config.reindex_chunk_size,
            delay: self.config.reindex_chunk_delay(),
            shutdown: self.shutdown_tx.subscribe(),
        };
        let join = tokio::spawn(task.run());
        self.reindex_tasks.lock().push(join.abort_handle());
        Ok(join)
    }

    /// Stop reindexing, stop the indexing thread and close the index
    ///
    /// Queued batches that were not applied yet are dropped.
    pub fn shutdown(&self) -> SearchResult<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down index manager");

        let _ = self.shutdown_tx.send(true);
        for task in self.reindex_tasks.lock().drain(..) {
            task.abort();
        }

        if let Some(mut index) = self.thread.stop()? {
            index.close()?;
        }
        Ok(())
    }
}

impl Drop for IndexManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(error = %e, "Index manager shutdown on drop failed");
        }
    }
}

struct ReindexTask {
    thread: Arc<IndexingThread>,
    spec: Arc<IndexTypeSpec>,
    chunk_size: usize,
    delay: std::time::Duration,
    shutdown: watch::Receiver<bool>,
}

impl ReindexTask {
    async fn run(mut self) -> SearchResult<ReindexSummary> {
        let type_name = self.spec.name.clone();
        let Some(provider) = self.spec.provider().cloned() else {
            return Err(SearchError::InvalidConfiguration(format!(
                "type {type_name} has no record provider"
            )));
        };

        info!(type_name = %type_name, "Reindex started, clearing existing documents");
        let (reply, cleared) = oneshot::channel();
        self.thread.submit(IndexingCommand::ClearType {
            type_name: type_name.clone(),
            reply,
        })?;
        match cleared.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(type_name = %type_name, error = %e, "Reindex aborted, could not clear documents");
                return Err(e);
            }
            Err(_) => return Err(SearchError::ShutDown),
        }

        let mut summary = ReindexSummary::default();
        let mut offset = 0;
        loop {
            if *self.shutdown.borrow() {
                summary.cancelled = true;
                break;
            }

            let chunk = provider
                .fetch_chunk(offset, self.chunk_size)
                .await
                .map_err(|e| SearchError::IndexingFailed(format!("record provider failed: {e}")))?;
            if chunk.is_empty() {
                break;
            }

            offset += chunk.len();
            summary.batches += 1;
            summary.records += chunk.len();
            self.thread
                .submit(IndexingCommand::Apply(IndexMutationBatch::new(self.spec.clone(), chunk)))?;

            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = self.shutdown.changed() => {
                    summary.cancelled = true;
                    break;
                }
            }
        }

        info!(
            type_name = %type_name,
            batches = summary.batches,
            records = summary.records,
            cancelled = summary.cancelled,
            "Reindex finished"
        );
        Ok(summary)
    }
}
