//! Wiring of index, loader and grouper into one running pipeline

use crate::config::Config;
use crate::error::Result;
use crate::grouping::{GroupingQueue, NewsGrouper};
use crate::loader::{ContentLoaderManager, ReaderRegistry};
use crate::news::{news_type_spec, NewsIndexHook, NewsRecordProvider};
use crate::search::{IndexManager, IndexSearch, IndexTypeSpec, ReindexSummary, SearchResult};
use crate::state::{NewsStore, SourceStore};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::info;

/// The running news pipeline
///
/// Fetched items flow from the loader into the store and the index; once
/// committed they are marked indexed and, while ungrouped, queued for
/// grouping.
pub struct Pipeline {
    news_type: Arc<IndexTypeSpec>,
    index: Arc<IndexManager>,
    queue: Arc<GroupingQueue>,
    grouper: Option<NewsGrouper>,
    loader: Option<ContentLoaderManager>,
}

impl Pipeline {
    /// Open the index and start grouping and loading as configured
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(
        config: Config,
        news: Arc<dyn NewsStore>,
        sources: Arc<dyn SourceStore>,
        readers: ReaderRegistry,
    ) -> Result<Self> {
        let queue = Arc::new(GroupingQueue::new(config.grouping.queue_warn_threshold));

        let mut hook = NewsIndexHook::new(news.clone(), Handle::current());
        if config.grouping.enabled {
            hook = hook.with_grouping_queue(queue.clone());
        }
        let news_type = Arc::new(news_type_spec(
            Some(Arc::new(NewsRecordProvider::new(news.clone()))),
            Some(Arc::new(hook)),
        ));

        let index = Arc::new(IndexManager::open(config.search.clone(), &[news_type.clone()])?);
        info!("Search index opened");

        let grouper = if config.grouping.enabled {
            Some(
                NewsGrouper::start(
                    config.grouping.clone(),
                    queue.clone(),
                    news.clone(),
                    index.clone(),
                    news_type.clone(),
                )
                .await?,
            )
        } else {
            info!("Grouping disabled in configuration");
            None
        };

        let loader = if config.loader.enabled {
            Some(
                ContentLoaderManager::start(
                    config.loader.clone(),
                    sources,
                    news,
                    index.clone(),
                    news_type.clone(),
                    readers,
                )
                .await?,
            )
        } else {
            info!("Content loader disabled in configuration");
            None
        };

        Ok(Self {
            news_type,
            index,
            queue,
            grouper,
            loader,
        })
    }

    pub fn index(&self) -> &Arc<IndexManager> {
        &self.index
    }

    pub fn searcher(&self) -> IndexSearch {
        self.index.searcher()
    }

    pub fn news_type(&self) -> &Arc<IndexTypeSpec> {
        &self.news_type
    }

    pub fn grouping_queue(&self) -> &Arc<GroupingQueue> {
        &self.queue
    }

    pub fn grouper(&self) -> Option<&NewsGrouper> {
        self.grouper.as_ref()
    }

    pub fn loader(&self) -> Option<&ContentLoaderManager> {
        self.loader.as_ref()
    }

    /// Rebuild the news documents from the store
    pub fn reindex_news(&self) -> Result<JoinHandle<SearchResult<ReindexSummary>>> {
        info!("Starting full news reindex");
        Ok(self.index.reindex(self.news_type.clone())?)
    }

    /// Stop loading, then grouping, then indexing
    pub fn shutdown(&self) -> Result<()> {
        if let Some(loader) = &self.loader {
            loader.shutdown();
        }
        if let Some(grouper) = &self.grouper {
            grouper.shutdown();
        }
        self.index.shutdown()?;
        info!("Pipeline shut down");
        Ok(())
    }
}
