use crate::error::{AppError, Result};
use crate::models::{
    CommittedNews, ContentSource, FetchHistory, News, NewsDraft, NewsGroupId, NewsId,
};
use crate::state::{NewsStore, SourceStore, UpsertOutcome, Upserted};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree, Transactional,
};
use sled::Db;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

type TxResult<T> = std::result::Result<T, ConflictableTransactionError<AppError>>;

/// Persistent store using the Sled embedded database
#[derive(Clone)]
pub struct SledStore {
    db: Arc<Db>,
    news_tree: sled::Tree,
    links_tree: sled::Tree,
    sources_tree: sled::Tree,
    fetch_history_tree: sled::Tree,
    latest_fetch_tree: sled::Tree,
}

impl SledStore {
    /// Open or create a store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())
            .map_err(|e| AppError::Storage(format!("Failed to open Sled database: {}", e)))?;

        let open_tree = |name: &str| {
            db.open_tree(name)
                .map_err(|e| AppError::Storage(format!("Failed to open {} tree: {}", name, e)))
        };
        let news_tree = open_tree("news")?;
        let links_tree = open_tree("news_links")?;
        let sources_tree = open_tree("sources")?;
        let fetch_history_tree = open_tree("fetch_history")?;
        let latest_fetch_tree = open_tree("latest_fetch")?;

        tracing::info!("Initialized Sled store at {:?}", path.as_ref());

        Ok(Self {
            db: Arc::new(db),
            news_tree,
            links_tree,
            sources_tree,
            fetch_history_tree,
            latest_fetch_tree,
        })
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }

    fn id_key(id: i64) -> Vec<u8> {
        id.to_be_bytes().to_vec()
    }

    fn fetch_key(history: &FetchHistory) -> Vec<u8> {
        let mut key = history.source_id.to_be_bytes().to_vec();
        key.extend_from_slice(&history.fetched_at.timestamp_millis().to_be_bytes());
        key
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn decode_id(bytes: &[u8]) -> Result<NewsId> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| AppError::Storage("Corrupt news id key".to_string()))?;
        Ok(i64::from_be_bytes(raw))
    }

    fn all_news(&self) -> Result<Vec<News>> {
        self.news_tree
            .iter()
            .values()
            .map(|value| Self::decode::<News>(&value?))
            .collect()
    }
}

fn tx_encode<T: Serialize>(value: &T) -> TxResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn tx_decode<T: DeserializeOwned>(bytes: &[u8]) -> TxResult<T> {
    bincode::deserialize(bytes).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn tx_put_news(news_tx: &TransactionalTree, links_tx: &TransactionalTree, news: &News) -> TxResult<()> {
    news_tx.insert(SledStore::id_key(news.id), tx_encode(news)?)?;
    links_tx.insert(news.link.as_bytes(), SledStore::id_key(news.id))?;
    Ok(())
}

fn from_tx_error(err: TransactionError<AppError>) -> AppError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => AppError::Storage(format!("Transaction failed: {}", e)),
    }
}

#[async_trait]
impl NewsStore for SledStore {
    async fn upsert_news(&self, draft: NewsDraft) -> Result<Upserted> {
        let upserted = (&self.news_tree, &self.links_tree)
            .transaction(|(news_tx, links_tx)| {
                let existing = match links_tx.get(draft.link.as_bytes())? {
                    Some(id) => match news_tx.get(&*id)? {
                        Some(bytes) => Some(tx_decode::<News>(&bytes)?),
                        None => None,
                    },
                    None => None,
                };

                match existing {
                    Some(news) if !draft.differs_from(&news) => Ok(Upserted {
                        news,
                        outcome: UpsertOutcome::Unchanged,
                    }),
                    Some(mut news) => {
                        news.apply_draft(draft.clone());
                        tx_put_news(news_tx, links_tx, &news)?;
                        Ok(Upserted {
                            news,
                            outcome: UpsertOutcome::Updated,
                        })
                    }
                    None => {
                        let id = news_tx.generate_id()? as i64 + 1;
                        let news = News::from_draft(id, draft.clone());
                        tx_put_news(news_tx, links_tx, &news)?;
                        Ok(Upserted {
                            news,
                            outcome: UpsertOutcome::Created,
                        })
                    }
                }
            })
            .map_err(from_tx_error)?;

        tracing::debug!(news_id = upserted.news.id, outcome = ?upserted.outcome, "News upserted");
        Ok(upserted)
    }

    async fn get_news(&self, id: NewsId) -> Result<Option<News>> {
        match self.news_tree.get(Self::id_key(id))? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_news_many(&self, ids: &[NewsId]) -> Result<Vec<News>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(bytes) = self.news_tree.get(Self::id_key(*id))? {
                found.push(Self::decode(&bytes)?);
            }
        }
        Ok(found)
    }

    async fn assign_group(&self, ids: &[NewsId], group: NewsGroupId) -> Result<Vec<News>> {
        let changed = self
            .news_tree
            .transaction(|news_tx| {
                let mut changed = Vec::with_capacity(ids.len());
                for id in ids {
                    let key = Self::id_key(*id);
                    let Some(bytes) = news_tx.get(&key)? else {
                        continue;
                    };
                    let mut news: News = tx_decode(&bytes)?;
                    if news.news_group_id.is_unsettled() && news.news_group_id != group {
                        news.news_group_id = group;
                        news_tx.insert(key, tx_encode(&news)?)?;
                        changed.push(news);
                    }
                }
                Ok(changed)
            })
            .map_err(from_tx_error)?;
        tracing::debug!(count = changed.len(), %group, "Group assigned in one transaction");
        Ok(changed)
    }

    async fn list_news_page(&self, offset: usize, limit: usize) -> Result<Vec<News>> {
        // positive ids in big-endian order iterate ascending
        self.news_tree
            .iter()
            .values()
            .skip(offset)
            .take(limit)
            .map(|value| Self::decode::<News>(&value?))
            .collect()
    }

    async fn mark_indexed(&self, committed: &[CommittedNews]) -> Result<Vec<NewsId>> {
        self.news_tree
            .transaction(|news_tx| {
                let mut marked = Vec::with_capacity(committed.len());
                for version in committed {
                    let key = Self::id_key(version.id);
                    let Some(bytes) = news_tx.get(&key)? else {
                        continue;
                    };
                    let mut news: News = tx_decode(&bytes)?;
                    if !version.matches(&news) {
                        continue;
                    }
                    if !news.indexed {
                        news.indexed = true;
                        news_tx.insert(key, tx_encode(&news)?)?;
                    }
                    marked.push(news.id);
                }
                Ok(marked)
            })
            .map_err(from_tx_error)
    }

    async fn max_group_id(&self) -> Result<i64> {
        Ok(self
            .all_news()?
            .iter()
            .filter_map(|news| news.news_group_id.group())
            .max()
            .unwrap_or(0))
    }
}

#[async_trait]
impl SourceStore for SledStore {
    async fn add_source(&self, source: ContentSource) -> Result<()> {
        self.sources_tree
            .insert(Self::id_key(source.id), bincode::serialize(&source)?)?;
        Ok(())
    }

    async fn list_sources(&self) -> Result<Vec<ContentSource>> {
        self.sources_tree
            .iter()
            .values()
            .map(|value| Self::decode::<ContentSource>(&value?))
            .collect()
    }

    async fn record_fetch(&self, history: FetchHistory) -> Result<()> {
        let encoded = bincode::serialize(&history)?;
        (&self.fetch_history_tree, &self.latest_fetch_tree)
            .transaction(|(history_tx, latest_tx)| {
                history_tx.insert(Self::fetch_key(&history), encoded.clone())?;

                let key = Self::id_key(history.source_id);
                let newer_known = match latest_tx.get(&key)? {
                    Some(bytes) => tx_decode::<FetchHistory>(&bytes)?.fetched_at > history.fetched_at,
                    None => false,
                };
                if !newer_known {
                    latest_tx.insert(key, encoded.clone())?;
                }
                Ok(())
            })
            .map_err(from_tx_error)
    }

    async fn latest_fetches(&self) -> Result<HashMap<i64, FetchHistory>> {
        let mut latest = HashMap::new();
        for entry in self.latest_fetch_tree.iter() {
            let (key, value) = entry?;
            let history: FetchHistory = Self::decode(&value)?;
            latest.insert(Self::decode_id(&key)?, history);
        }
        Ok(latest)
    }
}
