pub mod factory;
pub mod memory;
pub mod sled_store;

pub use factory::{create_in_memory_store, create_store, StoreHandles};
pub use memory::InMemoryStore;
pub use sled_store::SledStore;

use crate::error::Result;
use crate::models::{
    CommittedNews, ContentSource, FetchHistory, News, NewsDraft, NewsGroupId, NewsId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What an upsert did to the stored item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Same link, same content
    Unchanged,
}

/// Result of persisting one fetched draft
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub news: News,
    pub outcome: UpsertOutcome,
}

/// Store of record for news items
///
/// The store is the source of truth; the search index follows it.
#[async_trait]
pub trait NewsStore: Send + Sync {
    /// Insert a draft, or update the item already stored under its link
    async fn upsert_news(&self, draft: NewsDraft) -> Result<Upserted>;

    async fn get_news(&self, id: NewsId) -> Result<Option<News>>;

    /// Items in the order of `ids`; unknown ids are skipped
    async fn get_news_many(&self, ids: &[NewsId]) -> Result<Vec<News>>;

    /// Move the still unsettled items among `ids` into `group`, in one transaction
    ///
    /// Only the group id is written, so content stored meanwhile is kept.
    /// Returns the items that changed, as stored afterwards.
    async fn assign_group(&self, ids: &[NewsId], group: NewsGroupId) -> Result<Vec<News>>;

    /// A page of items in ascending id order
    async fn list_news_page(&self, offset: usize, limit: usize) -> Result<Vec<News>>;

    /// Flag items indexed whose stored content is still the committed one
    ///
    /// Returns the ids that matched; items changed since the commit wait for
    /// their own batch.
    async fn mark_indexed(&self, committed: &[CommittedNews]) -> Result<Vec<NewsId>>;

    /// Highest positive group id in use, 0 when there is none
    async fn max_group_id(&self) -> Result<i64>;
}

/// Store of content sources and their fetch history
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn add_source(&self, source: ContentSource) -> Result<()>;

    async fn list_sources(&self) -> Result<Vec<ContentSource>>;

    /// Append a fetch record
    async fn record_fetch(&self, history: FetchHistory) -> Result<()>;

    /// Most recent fetch per source id
    async fn latest_fetches(&self) -> Result<HashMap<i64, FetchHistory>>;
}
