//! Consumer that clusters committed news into groups

use crate::error::Result;
use crate::grouping::config::GroupingConfig;
use crate::grouping::finder::SimilarNewsFinder;
use crate::grouping::queue::GroupingQueue;
use crate::models::{News, NewsGroupId, NewsId};
use crate::news::news_record;
use crate::search::{IndexManager, IndexMutationBatch, IndexTypeSpec, Operation};
use crate::state::NewsStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info};

/// What grouping did with one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupOutcome {
    /// Missing from the store or not indexed yet
    Skipped,
    /// No similar item found
    NoMatch,
    /// Item and candidates share `group_id`; `changed` items were saved
    Grouped { group_id: i64, changed: usize },
}

struct GrouperShared {
    config: GroupingConfig,
    queue: Arc<GroupingQueue>,
    finder: SimilarNewsFinder,
    store: Arc<dyn NewsStore>,
    index: Arc<IndexManager>,
    news_type: Arc<IndexTypeSpec>,
    last_group_id: AtomicI64,
    retries: Mutex<Vec<AbortHandle>>,
    shut_down: AtomicBool,
}

/// Groups every item that reaches the grouping queue
///
/// Items are taken one at a time. A failed item is queued again after the
/// retry delay, as often as it takes.
pub struct NewsGrouper {
    shared: Arc<GrouperShared>,
    shutdown_tx: watch::Sender<bool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl NewsGrouper {
    /// Seed the group id counter from the store and start consuming `queue`
    pub async fn start(
        config: GroupingConfig,
        queue: Arc<GroupingQueue>,
        store: Arc<dyn NewsStore>,
        index: Arc<IndexManager>,
        news_type: Arc<IndexTypeSpec>,
    ) -> Result<Self> {
        let last_group_id = store.max_group_id().await?;
        let finder = SimilarNewsFinder::new(index.searcher(), store.clone(), &config);
        info!(
            last_group_id,
            min_score = config.min_score,
            "Starting news grouper"
        );

        let shared = Arc::new(GrouperShared {
            config,
            queue,
            finder,
            store,
            index,
            news_type,
            last_group_id: AtomicI64::new(last_group_id),
            retries: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consumer = tokio::spawn(run_consumer(shared.clone(), shutdown_rx));

        Ok(Self {
            shared,
            shutdown_tx,
            consumer: Mutex::new(Some(consumer)),
        })
    }

    /// Group one item right away, outside the queue
    pub async fn group_now(&self, id: NewsId) -> Result<GroupOutcome> {
        self.shared.group(id).await
    }

    /// Members of a group as the index sees them, newest first
    pub async fn group_members(&self, group_id: i64) -> Result<Vec<News>> {
        self.shared.finder.group_members(group_id).await
    }

    pub fn finder(&self) -> &SimilarNewsFinder {
        &self.shared.finder
    }

    /// Highest group id handed out so far
    pub fn last_group_id(&self) -> i64 {
        self.shared.last_group_id.load(Ordering::SeqCst)
    }

    /// Retry timers still waiting
    pub fn pending_retries(&self) -> usize {
        let mut retries = self.shared.retries.lock();
        retries.retain(|handle| !handle.is_finished());
        retries.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::SeqCst)
    }

    /// Stop the consumer and cancel every pending retry
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down news grouper");
        let _ = self.shutdown_tx.send(true);
        if let Some(consumer) = self.consumer.lock().take() {
            consumer.abort();
        }
        for retry in self.shared.retries.lock().drain(..) {
            retry.abort();
        }
    }
}

impl Drop for NewsGrouper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_consumer(shared: Arc<GrouperShared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let id = tokio::select! {
            id = shared.queue.pop() => id,
            _ = shutdown.changed() => break,
        };

        match shared.group(id).await {
            Ok(outcome) => debug!(news_id = id, outcome = ?outcome, "Grouped news item"),
            Err(e) => {
                error!(news_id = id, error = %e, "Failed to group news item");
                shared.schedule_retry(id, shutdown.clone());
            }
        }
    }
    debug!("Grouping consumer stopped");
}

impl GrouperShared {
    async fn group(&self, id: NewsId) -> Result<GroupOutcome> {
        let Some(news) = self.store.get_news(id).await? else {
            debug!(news_id = id, "News item vanished before grouping");
            return Ok(GroupOutcome::Skipped);
        };
        if !news.indexed {
            debug!(news_id = id, "News item not indexed yet, skipping");
            return Ok(GroupOutcome::Skipped);
        }

        let candidates = self.finder.find_similar(&news).await?;
        if candidates.is_empty() {
            if news.news_group_id == NewsGroupId::NotGroupedYet {
                self.assign(&[news.id], NewsGroupId::NoGroup).await?;
            }
            return Ok(GroupOutcome::NoMatch);
        }

        let group_id = news
            .news_group_id
            .group()
            .or_else(|| {
                candidates
                    .iter()
                    .find_map(|candidate| candidate.news.news_group_id.group())
            })
            .unwrap_or_else(|| self.mint_group_id());
        let group = NewsGroupId::Group(group_id);

        let mut ids = Vec::with_capacity(candidates.len() + 1);
        if news.news_group_id != group {
            ids.push(news.id);
        }
        ids.extend(
            candidates
                .iter()
                .filter(|candidate| candidate.news.news_group_id.is_unsettled())
                .map(|candidate| candidate.news.id),
        );

        let changed = self.assign(&ids, group).await?;
        Ok(GroupOutcome::Grouped { group_id, changed })
    }

    fn mint_group_id(&self) -> i64 {
        self.last_group_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Write the group id in one transaction, then re-index what changed as one batch
    ///
    /// The batch carries the content the store holds now, not what the
    /// similarity search saw.
    async fn assign(&self, ids: &[NewsId], group: NewsGroupId) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let changed = self.store.assign_group(ids, group).await?;
        if changed.is_empty() {
            return Ok(0);
        }
        let records = changed
            .iter()
            .map(|item| news_record(item, Operation::Update))
            .collect();
        self.index
            .index(IndexMutationBatch::new(self.news_type.clone(), records))?;
        Ok(changed.len())
    }

    fn schedule_retry(&self, id: NewsId, mut shutdown: watch::Receiver<bool>) {
        let delay = self.config.retry_delay();
        let queue = self.queue.clone();
        info!(news_id = id, delay_ms = delay.as_millis() as u64, "Scheduling grouping retry");

        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => queue.push(id),
                _ = shutdown.changed() => {}
            }
        });

        let mut retries = self.retries.lock();
        retries.retain(|handle| !handle.is_finished());
        retries.push(timer.abort_handle());
    }
}
