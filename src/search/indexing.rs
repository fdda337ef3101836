//! The single consumer that applies mutation batches to the index

use crate::search::error::{SearchError, SearchResult};
use crate::search::index::SearchIndex;
use crate::search::metrics::SEARCH_METRICS;
use crate::search::schema::{IndexMutationBatch, Operation};
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use strum::Display;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Attempts per batch; the second one replays a batch whose writes were lost to a rebuild
const MAX_BATCH_ATTEMPTS: usize = 2;

/// Work items for the indexing thread
pub enum IndexingCommand {
    /// Apply a batch and commit it as one unit
    Apply(IndexMutationBatch),
    /// Remove every document of a type and commit
    ClearType {
        type_name: String,
        reply: oneshot::Sender<SearchResult<()>>,
    },
}

/// Lifecycle of the indexing thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum IndexingState {
    Idle = 0,
    Draining = 1,
    Stopped = 2,
}

impl IndexingState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => IndexingState::Idle,
            1 => IndexingState::Draining,
            _ => IndexingState::Stopped,
        }
    }
}

struct Shared {
    state: AtomicU8,
    depth: AtomicUsize,
}

impl Shared {
    fn set_state(&self, state: IndexingState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Dedicated OS thread owning the `SearchIndex`
///
/// The queue is unbounded: producers never block, a deep queue only logs.
pub struct IndexingThread {
    commands: Mutex<Option<Sender<IndexingCommand>>>,
    stop: Mutex<Option<Sender<()>>>,
    join: Mutex<Option<JoinHandle<SearchIndex>>>,
    shared: Arc<Shared>,
    warn_threshold: usize,
}

impl IndexingThread {
    pub fn spawn(index: SearchIndex, warn_threshold: usize) -> SearchResult<Self> {
        let (command_tx, command_rx) = channel::unbounded();
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let shared = Arc::new(Shared {
            state: AtomicU8::new(IndexingState::Idle as u8),
            depth: AtomicUsize::new(0),
        });

        let thread_shared = shared.clone();
        let join = std::thread::Builder::new()
            .name("newsdesk-indexing".to_string())
            .spawn(move || run(index, command_rx, stop_rx, thread_shared))?;

        info!("Indexing thread started");

        Ok(Self {
            commands: Mutex::new(Some(command_tx)),
            stop: Mutex::new(Some(stop_tx)),
            join: Mutex::new(Some(join)),
            shared,
            warn_threshold,
        })
    }

    /// Queue a command without waiting for it to be applied
    pub fn submit(&self, command: IndexingCommand) -> SearchResult<()> {
        let guard = self.commands.lock();
        let sender = guard.as_ref().ok_or(SearchError::ShutDown)?;

        let depth = self.shared.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if sender.send(command).is_err() {
            self.shared.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(SearchError::ShutDown);
        }
        SEARCH_METRICS.queue_depth.set(depth as f64);

        if depth > self.warn_threshold {
            warn!(
                queue_depth = depth,
                threshold = self.warn_threshold,
                "Indexing queue is backing up"
            );
        }
        Ok(())
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.depth.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> IndexingState {
        IndexingState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Stop the thread and hand back the index; `None` if already stopped
    ///
    /// A batch in progress is rolled back, queued batches are dropped.
    pub fn stop(&self) -> SearchResult<Option<SearchIndex>> {
        self.commands.lock().take();
        self.stop.lock().take();

        let Some(join) = self.join.lock().take() else {
            return Ok(None);
        };
        let index = join.join().map_err(|_| {
            SearchError::IndexingFailed("indexing thread panicked".to_string())
        })?;
        info!("Indexing thread stopped");
        Ok(Some(index))
    }
}

impl Drop for IndexingThread {
    fn drop(&mut self) {
        self.commands.get_mut().take();
        self.stop.get_mut().take();
    }
}

fn run(
    mut index: SearchIndex,
    commands: Receiver<IndexingCommand>,
    stop: Receiver<()>,
    shared: Arc<Shared>,
) -> SearchIndex {
    loop {
        channel::select! {
            recv(stop) -> _ => break,
            recv(commands) -> command => {
                let Ok(command) = command else { break };
                let depth = shared.depth.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
                SEARCH_METRICS.queue_depth.set(depth as f64);

                shared.set_state(IndexingState::Draining);
                let interrupted = handle_command(&mut index, command, &stop);
                shared.set_state(IndexingState::Idle);
                if interrupted {
                    break;
                }
            }
        }
    }
    shared.set_state(IndexingState::Stopped);
    index
}

/// Returns true when a stop request interrupted the command
fn handle_command(index: &mut SearchIndex, command: IndexingCommand, stop: &Receiver<()>) -> bool {
    match command {
        IndexingCommand::Apply(batch) => {
            let type_name = batch.type_spec.name.clone();
            match apply_batch(index, &batch, stop) {
                Ok(()) => {
                    SEARCH_METRICS.record_batch(&type_name, true);
                    debug!(type_name = %type_name, batch_size = batch.len(), "Batch committed");
                    if let Some(hook) = batch.type_spec.post_index_hook() {
                        hook.after_commit(&batch);
                    }
                    false
                }
                Err(SearchError::ShutDown) => {
                    SEARCH_METRICS.record_batch(&type_name, false);
                    info!(type_name = %type_name, "Batch abandoned on shutdown");
                    true
                }
                Err(e) => {
                    SEARCH_METRICS.record_batch(&type_name, false);
                    error!(
                        type_name = %type_name,
                        batch_size = batch.len(),
                        error = %e,
                        "Failed to apply index batch, rolled back"
                    );
                    false
                }
            }
        }
        IndexingCommand::ClearType { type_name, reply } => {
            let mut result = index.delete_type(&type_name);
            if result.is_ok() {
                result = index.commit();
            }
            if let Err(e) = &result {
                rollback_quietly(index);
                error!(type_name = %type_name, error = %e, "Failed to clear documents of type");
            }
            let _ = reply.send(result);
            false
        }
    }
}

fn apply_batch(
    index: &mut SearchIndex,
    batch: &IndexMutationBatch,
    stop: &Receiver<()>,
) -> SearchResult<()> {
    let type_name = batch.type_spec.name.as_str();

    for attempt in 0..MAX_BATCH_ATTEMPTS {
        let generation = index.generation();
        let replay = attempt > 0;
        let started = Instant::now();

        let mut result = apply_records(index, batch, stop, replay);
        if result.is_ok() {
            result = index.commit();
        }
        match result {
            Ok(()) if index.generation() == generation => {
                SEARCH_METRICS.record_commit(type_name, started.elapsed().as_secs_f64());
                for record in &batch.records {
                    SEARCH_METRICS
                        .records_total
                        .with_label_values(&[type_name, &record.operation.to_string()])
                        .inc();
                }
                return Ok(());
            }
            Ok(()) => {
                warn!(
                    type_name,
                    batch_size = batch.len(),
                    "Index was rebuilt while applying batch, replaying it"
                );
            }
            Err(e) => {
                rollback_quietly(index);
                return Err(e);
            }
        }
    }

    Err(SearchError::IndexingFailed(format!(
        "index was rebuilt on every attempt to apply a {type_name} batch"
    )))
}

fn apply_records(
    index: &mut SearchIndex,
    batch: &IndexMutationBatch,
    stop: &Receiver<()>,
    replay: bool,
) -> SearchResult<()> {
    let spec = batch.type_spec.as_ref();
    for record in &batch.records {
        if matches!(stop.try_recv(), Err(TryRecvError::Disconnected)) {
            return Err(SearchError::ShutDown);
        }

        let locale = record.locale.as_deref();
        match record.operation {
            Operation::Insert => {
                // part of a replayed batch may already be committed
                if replay {
                    index.delete_record(&spec.name, &record.id)?;
                }
                index.add_document(spec, record, locale)?;
            }
            Operation::Update => {
                index.delete_record(&spec.name, &record.id)?;
                index.add_document(spec, record, locale)?;
            }
            Operation::Delete => index.delete_record(&spec.name, &record.id)?,
        }
    }
    Ok(())
}

fn rollback_quietly(index: &mut SearchIndex) {
    if let Err(e) = index.rollback() {
        error!(error = %e, "Index rollback failed");
    }
}
