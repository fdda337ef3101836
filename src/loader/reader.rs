//! Source readers turning a content source into news drafts

use crate::loader::config::LoaderConfig;
use crate::loader::error::{LoaderError, LoaderResult};
use crate::models::{ContentSource, FetchHistory, NewsDraft, SourceType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Fetches the current items of one kind of source
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Source type this reader handles
    fn source_type(&self) -> SourceType;

    /// Items of `source`, leaving out those already seen by a successful `last_fetch`
    async fn read(
        &self,
        source: &ContentSource,
        last_fetch: Option<&FetchHistory>,
    ) -> LoaderResult<Vec<NewsDraft>>;
}

/// Readers by the source type they handle
#[derive(Clone, Default)]
pub struct ReaderRegistry {
    readers: HashMap<SourceType, Arc<dyn SourceReader>>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in readers
    pub fn with_defaults(config: &LoaderConfig) -> LoaderResult<Self> {
        Ok(Self::new().with_reader(Arc::new(JsonFeedReader::new(config)?)))
    }

    pub fn with_reader(mut self, reader: Arc<dyn SourceReader>) -> Self {
        self.register(reader);
        self
    }

    /// Register a reader, replacing the one for the same source type
    pub fn register(&mut self, reader: Arc<dyn SourceReader>) {
        self.readers.insert(reader.source_type(), reader);
    }

    pub fn get(&self, source_type: SourceType) -> Option<Arc<dyn SourceReader>> {
        self.readers.get(&source_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct JsonFeed {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedItem {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    external_url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content_text: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    date_published: Option<DateTime<Utc>>,
    #[serde(default)]
    date_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    language: Option<String>,
}

impl JsonFeedItem {
    fn into_draft(
        self,
        source: &ContentSource,
        feed_language: Option<&str>,
        now: DateTime<Utc>,
    ) -> NewsDraft {
        let link = self.url.or(self.external_url).unwrap_or(self.id);
        NewsDraft {
            provider_id: source.id,
            category_id: source.category_id,
            title: self.title.unwrap_or_default(),
            locale: self
                .language
                .or_else(|| feed_language.map(str::to_string))
                .or_else(|| source.locale.clone()),
            text: self.content_text.or(self.summary).unwrap_or_default(),
            publish_date: self.date_published.or(self.date_modified).unwrap_or(now),
            link,
            image_url: self.image,
            image_width: None,
            image_height: None,
        }
    }
}

/// Reader for JSON Feed 1.1 documents
pub struct JsonFeedReader {
    client: Client,
}

impl JsonFeedReader {
    pub fn new(config: &LoaderConfig) -> LoaderResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                LoaderError::ConfigurationError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    fn to_drafts(
        feed: JsonFeed,
        source: &ContentSource,
        last_fetch: Option<&FetchHistory>,
    ) -> Vec<NewsDraft> {
        let now = Utc::now();
        let seen_until = last_fetch
            .filter(|history| history.success)
            .map(|history| history.fetched_at);
        let feed_language = feed.language.as_deref();

        feed.items
            .into_iter()
            .map(|item| item.into_draft(source, feed_language, now))
            .filter(|draft| match seen_until {
                Some(seen_until) => draft.publish_date >= seen_until,
                None => true,
            })
            .collect()
    }
}

#[async_trait]
impl SourceReader for JsonFeedReader {
    fn source_type(&self) -> SourceType {
        SourceType::JsonFeed
    }

    async fn read(
        &self,
        source: &ContentSource,
        last_fetch: Option<&FetchHistory>,
    ) -> LoaderResult<Vec<NewsDraft>> {
        let feed: JsonFeed = self
            .client
            .get(&source.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let total = feed.items.len();
        let drafts = Self::to_drafts(feed, source, last_fetch);
        debug!(
            source_id = source.id,
            total,
            new = drafts.len(),
            "Read JSON feed"
        );
        Ok(drafts)
    }
}
