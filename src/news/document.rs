//! News items as documents of the search index

use crate::grouping::GroupingQueue;
use crate::models::{CommittedNews, News, NewsGroupId, NewsId, NOT_GROUPED_YET};
use crate::search::{
    FieldDef, FieldPolicy, FieldType, IndexMutationBatch, IndexTypeSpec, IndexableRecord,
    Operation, PostIndexHook, RecordProvider,
};
use crate::state::NewsStore;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error};

/// Index type name of news documents
pub const NEWS_TYPE: &str = "news";

pub const TITLE_FIELD: &str = "title";
pub const TEXT_FIELD: &str = "text";
pub const LINK_FIELD: &str = "link";
pub const PROVIDER_ID_FIELD: &str = "provider_id";
pub const CATEGORY_ID_FIELD: &str = "category_id";
pub const PUBLISH_DATE_FIELD: &str = "publish_date";
pub const NEWS_GROUP_ID_FIELD: &str = "news_group_id";
pub const IMAGE_URL_FIELD: &str = "image_url";

/// Field layout of news documents
pub fn news_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::text(TITLE_FIELD).with_boost(2.0),
        FieldDef::text(TEXT_FIELD),
        FieldDef::new(LINK_FIELD, FieldType::Text, FieldPolicy::STORED_ONLY),
        FieldDef::new(PROVIDER_ID_FIELD, FieldType::I64, FieldPolicy::KEYWORD),
        FieldDef::new(CATEGORY_ID_FIELD, FieldType::I64, FieldPolicy::KEYWORD),
        FieldDef::new(PUBLISH_DATE_FIELD, FieldType::Date, FieldPolicy::SORTABLE),
        FieldDef::new(NEWS_GROUP_ID_FIELD, FieldType::I64, FieldPolicy::SORTABLE),
        FieldDef::new(IMAGE_URL_FIELD, FieldType::Text, FieldPolicy::STORED_ONLY),
    ]
}

/// The news index type, optionally wired to a reindex provider and a post-index hook
pub fn news_type_spec(
    provider: Option<Arc<dyn RecordProvider>>,
    hook: Option<Arc<dyn PostIndexHook>>,
) -> IndexTypeSpec {
    let mut spec = IndexTypeSpec::new(NEWS_TYPE, news_fields());
    if let Some(provider) = provider {
        spec = spec.with_provider(provider);
    }
    if let Some(hook) = hook {
        spec = spec.with_post_index_hook(hook);
    }
    spec
}

/// Map a news item to an index record
pub fn news_record(news: &News, operation: Operation) -> IndexableRecord {
    let record = IndexableRecord::new(news.id.to_string(), operation);
    if operation == Operation::Delete {
        return record;
    }

    record
        .with_locale(news.locale.clone())
        .with_field(TITLE_FIELD, news.title.as_str())
        .with_field(TEXT_FIELD, news.text.as_str())
        .with_field(LINK_FIELD, news.link.as_str())
        .with_field(PROVIDER_ID_FIELD, news.provider_id)
        .with_field(CATEGORY_ID_FIELD, news.category_id)
        .with_field(PUBLISH_DATE_FIELD, news.publish_date)
        .with_field(NEWS_GROUP_ID_FIELD, news.news_group_id.as_raw())
        .with_optional(IMAGE_URL_FIELD, news.image_url.clone())
}

/// Pages the store of record during a full reindex
pub struct NewsRecordProvider {
    store: Arc<dyn NewsStore>,
}

impl NewsRecordProvider {
    pub fn new(store: Arc<dyn NewsStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RecordProvider for NewsRecordProvider {
    async fn fetch_chunk(
        &self,
        offset: usize,
        limit: usize,
    ) -> crate::error::Result<Vec<IndexableRecord>> {
        let page = self.store.list_news_page(offset, limit).await?;
        Ok(page
            .iter()
            .map(|news| news_record(news, Operation::Insert))
            .collect())
    }
}

/// Marks committed news as indexed and hands the ungrouped ones to grouping
///
/// Runs on the indexing thread, so the store work is spawned onto the runtime.
pub struct NewsIndexHook {
    store: Arc<dyn NewsStore>,
    queue: Option<Arc<GroupingQueue>>,
    runtime: Handle,
}

impl NewsIndexHook {
    pub fn new(store: Arc<dyn NewsStore>, runtime: Handle) -> Self {
        Self {
            store,
            queue: None,
            runtime,
        }
    }

    /// Feed ungrouped news into `queue` once they are indexed
    pub fn with_grouping_queue(mut self, queue: Arc<GroupingQueue>) -> Self {
        self.queue = Some(queue);
        self
    }
}

/// What a committed record says the stored item looked like
fn committed_news(id: NewsId, record: &IndexableRecord) -> Option<CommittedNews> {
    Some(CommittedNews {
        id,
        title: record.first_text(TITLE_FIELD)?.to_string(),
        text: record.first_text(TEXT_FIELD)?.to_string(),
        locale: record.locale.clone(),
        publish_date: record.first_date(PUBLISH_DATE_FIELD)?,
    })
}

impl PostIndexHook for NewsIndexHook {
    fn after_commit(&self, batch: &IndexMutationBatch) {
        let mut committed = Vec::new();
        let mut ungrouped = Vec::new();
        for record in &batch.records {
            if record.operation == Operation::Delete {
                continue;
            }
            let Ok(id) = record.id.parse::<NewsId>() else {
                error!(id = %record.id, "News record with a non-numeric id");
                continue;
            };
            let Some(version) = committed_news(id, record) else {
                error!(news_id = id, "News record without title, text or publish date");
                continue;
            };
            committed.push(version);
            let group = record
                .first_i64(NEWS_GROUP_ID_FIELD)
                .map_or(NewsGroupId::NotGroupedYet, NewsGroupId::from_raw);
            if self.queue.is_some() && group.as_raw() == NOT_GROUPED_YET {
                ungrouped.push(id);
            }
        }
        if committed.is_empty() {
            return;
        }

        let store = self.store.clone();
        let queue = self.queue.clone();
        self.runtime.spawn(async move {
            let marked = match store.mark_indexed(&committed).await {
                Ok(marked) => marked,
                Err(e) => {
                    error!(error = %e, count = committed.len(), "Failed to mark news as indexed");
                    return;
                }
            };
            // changed since this commit; their own batch marks them later
            ungrouped.retain(|id| marked.contains(id));
            debug!(
                committed = committed.len(),
                indexed = marked.len(),
                ungrouped = ungrouped.len(),
                "News committed to the index"
            );
            if let Some(queue) = queue {
                queue.push_all(ungrouped);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewsDraft;
    use crate::search::FieldValue;
    use crate::state::{InMemoryStore, NewsStore};
    use chrono::Utc;
    use std::time::Duration;

    fn draft(link: &str) -> NewsDraft {
        NewsDraft {
            provider_id: 2,
            category_id: 5,
            title: "Headline".to_string(),
            locale: Some("en".to_string()),
            text: "Body".to_string(),
            publish_date: Utc::now(),
            link: link.to_string(),
            image_url: None,
            image_width: None,
            image_height: None,
        }
    }

    #[test]
    fn test_news_record_fields() {
        let mut news = News::from_draft(12, draft("https://a"));
        news.news_group_id = NewsGroupId::Group(3);

        let record = news_record(&news, Operation::Update);
        assert_eq!(record.id, "12");
        assert_eq!(record.locale.as_deref(), Some("en"));
        assert_eq!(record.first_i64(NEWS_GROUP_ID_FIELD), Some(3));
        assert_eq!(record.first_i64(CATEGORY_ID_FIELD), Some(5));
        assert_eq!(
            record.values(TITLE_FIELD),
            &[FieldValue::Text("Headline".to_string())]
        );
        assert!(record.values(IMAGE_URL_FIELD).is_empty());

        let delete = news_record(&news, Operation::Delete);
        assert!(delete.fields.is_empty());
    }

    #[tokio::test]
    async fn test_provider_pages_store() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..5 {
            store.upsert_news(draft(&format!("https://n/{i}"))).await.unwrap();
        }
        let provider = NewsRecordProvider::new(store);

        assert_eq!(provider.fetch_chunk(0, 3).await.unwrap().len(), 3);
        assert_eq!(provider.fetch_chunk(3, 3).await.unwrap().len(), 2);
        assert!(provider.fetch_chunk(6, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hook_marks_indexed_and_queues_ungrouped() {
        let store = Arc::new(InMemoryStore::new());
        let fresh = store.upsert_news(draft("https://fresh")).await.unwrap().news;
        let mut grouped = store.upsert_news(draft("https://grouped")).await.unwrap().news;
        grouped.news_group_id = NewsGroupId::Group(1);

        let queue = Arc::new(GroupingQueue::new(10));
        let hook = NewsIndexHook::new(store.clone(), Handle::current())
            .with_grouping_queue(queue.clone());
        let spec = Arc::new(news_type_spec(None, None));
        hook.after_commit(&IndexMutationBatch::new(
            spec,
            vec![
                news_record(&fresh, Operation::Insert),
                news_record(&grouped, Operation::Update),
            ],
        ));

        let queued = tokio::time::timeout(Duration::from_secs(1), queue.pop())
            .await
            .unwrap();
        assert_eq!(queued, fresh.id);
        assert!(queue.is_empty());
        assert!(store.get_news(fresh.id).await.unwrap().unwrap().indexed);
        assert!(store.get_news(grouped.id).await.unwrap().unwrap().indexed);
    }

    #[tokio::test]
    async fn test_hook_skips_content_changed_after_commit() {
        let store = Arc::new(InMemoryStore::new());
        let stale = store.upsert_news(draft("https://a")).await.unwrap().news;
        let mut revised = draft("https://a");
        revised.title = "Revised headline".to_string();
        let current = store.upsert_news(revised).await.unwrap().news;

        let queue = Arc::new(GroupingQueue::new(10));
        let hook = NewsIndexHook::new(store.clone(), Handle::current())
            .with_grouping_queue(queue.clone());
        let spec = Arc::new(news_type_spec(None, None));

        hook.after_commit(&IndexMutationBatch::new(
            spec.clone(),
            vec![news_record(&stale, Operation::Insert)],
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!store.get_news(stale.id).await.unwrap().unwrap().indexed);
        assert!(queue.is_empty());

        hook.after_commit(&IndexMutationBatch::new(
            spec,
            vec![news_record(&current, Operation::Update)],
        ));
        let queued = tokio::time::timeout(Duration::from_secs(1), queue.pop())
            .await
            .unwrap();
        assert_eq!(queued, current.id);
        assert!(store.get_news(current.id).await.unwrap().unwrap().indexed);
    }
}
