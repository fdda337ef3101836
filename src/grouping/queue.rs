//! Hand-off queue between indexing and grouping

use crate::models::NewsId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use tracing::warn;

/// FIFO of news ids waiting to be grouped
pub struct GroupingQueue {
    items: Mutex<VecDeque<NewsId>>,
    notify: Notify,
    warn_threshold: usize,
}

impl GroupingQueue {
    pub fn new(warn_threshold: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            warn_threshold,
        }
    }

    pub fn push(&self, id: NewsId) {
        let depth = {
            let mut items = self.items.lock();
            items.push_back(id);
            items.len()
        };
        if depth > self.warn_threshold {
            warn!(depth, threshold = self.warn_threshold, "Grouping queue is backing up");
        }
        self.notify.notify_one();
    }

    pub fn push_all(&self, ids: impl IntoIterator<Item = NewsId>) {
        for id in ids {
            self.push(id);
        }
    }

    pub fn try_pop(&self) -> Option<NewsId> {
        self.items.lock().pop_front()
    }

    /// Wait for the next id
    pub async fn pop(&self) -> NewsId {
        loop {
            let pushed = self.notify.notified();
            if let Some(id) = self.try_pop() {
                return id;
            }
            pushed.await;
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
