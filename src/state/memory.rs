use crate::error::Result;
use crate::models::{
    CommittedNews, ContentSource, FetchHistory, News, NewsDraft, NewsGroupId, NewsId,
};
use crate::state::{NewsStore, SourceStore, UpsertOutcome, Upserted};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Default)]
struct NewsTable {
    by_id: BTreeMap<NewsId, News>,
    by_link: HashMap<String, NewsId>,
    last_id: NewsId,
}

impl NewsTable {
    fn put(&mut self, news: News) {
        self.last_id = self.last_id.max(news.id);
        self.by_link.insert(news.link.clone(), news.id);
        self.by_id.insert(news.id, news);
    }
}

/// In-memory store (for development and testing)
#[derive(Clone, Default)]
pub struct InMemoryStore {
    news: Arc<RwLock<NewsTable>>,
    sources: Arc<DashMap<i64, ContentSource>>,
    fetches: Arc<Mutex<Vec<FetchHistory>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn news_count(&self) -> usize {
        self.news.read().by_id.len()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().len()
    }
}

#[async_trait]
impl NewsStore for InMemoryStore {
    async fn upsert_news(&self, draft: NewsDraft) -> Result<Upserted> {
        let mut table = self.news.write();

        let existing = table
            .by_link
            .get(&draft.link)
            .and_then(|id| table.by_id.get(id))
            .cloned();

        let upserted = match existing {
            Some(news) if !draft.differs_from(&news) => Upserted {
                news,
                outcome: UpsertOutcome::Unchanged,
            },
            Some(mut news) => {
                news.apply_draft(draft);
                table.put(news.clone());
                Upserted {
                    news,
                    outcome: UpsertOutcome::Updated,
                }
            }
            None => {
                let news = News::from_draft(table.last_id + 1, draft);
                table.put(news.clone());
                Upserted {
                    news,
                    outcome: UpsertOutcome::Created,
                }
            }
        };

        tracing::debug!(news_id = upserted.news.id, outcome = ?upserted.outcome, "News upserted");
        Ok(upserted)
    }

    async fn get_news(&self, id: NewsId) -> Result<Option<News>> {
        Ok(self.news.read().by_id.get(&id).cloned())
    }

    async fn get_news_many(&self, ids: &[NewsId]) -> Result<Vec<News>> {
        let table = self.news.read();
        Ok(ids
            .iter()
            .filter_map(|id| table.by_id.get(id).cloned())
            .collect())
    }

    async fn assign_group(&self, ids: &[NewsId], group: NewsGroupId) -> Result<Vec<News>> {
        let mut table = self.news.write();
        let mut changed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(news) = table.by_id.get_mut(id) {
                if news.news_group_id.is_unsettled() && news.news_group_id != group {
                    news.news_group_id = group;
                    changed.push(news.clone());
                }
            }
        }
        Ok(changed)
    }

    async fn list_news_page(&self, offset: usize, limit: usize) -> Result<Vec<News>> {
        Ok(self
            .news
            .read()
            .by_id
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_indexed(&self, committed: &[CommittedNews]) -> Result<Vec<NewsId>> {
        let mut table = self.news.write();
        let mut marked = Vec::with_capacity(committed.len());
        for version in committed {
            if let Some(news) = table.by_id.get_mut(&version.id) {
                if version.matches(news) {
                    news.indexed = true;
                    marked.push(news.id);
                }
            }
        }
        Ok(marked)
    }

    async fn max_group_id(&self) -> Result<i64> {
        Ok(self
            .news
            .read()
            .by_id
            .values()
            .filter_map(|news| news.news_group_id.group())
            .max()
            .unwrap_or(0))
    }
}

#[async_trait]
impl SourceStore for InMemoryStore {
    async fn add_source(&self, source: ContentSource) -> Result<()> {
        self.sources.insert(source.id, source);
        Ok(())
    }

    async fn list_sources(&self) -> Result<Vec<ContentSource>> {
        let mut sources: Vec<ContentSource> =
            self.sources.iter().map(|entry| entry.value().clone()).collect();
        sources.sort_by_key(|source| source.id);
        Ok(sources)
    }

    async fn record_fetch(&self, history: FetchHistory) -> Result<()> {
        self.fetches.lock().push(history);
        Ok(())
    }

    async fn latest_fetches(&self) -> Result<HashMap<i64, FetchHistory>> {
        let mut latest: HashMap<i64, FetchHistory> = HashMap::new();
        for history in self.fetches.lock().iter() {
            match latest.get(&history.source_id) {
                Some(known) if known.fetched_at >= history.fetched_at => {}
                _ => {
                    latest.insert(history.source_id, history.clone());
                }
            }
        }
        Ok(latest)
    }
}
