//! Content loading from external sources
//!
//! Each enabled [`ContentSource`](crate::models::ContentSource) is polled on
//! its own interval.
//!
//! # Features
//!
//! - **Due-time schedule**: sources wait in a min-heap ordered by last fetch
//!   plus interval; sources never fetched go first, and adding a source wakes
//!   the scheduler at once
//! - **Bounded workers**: at most `max_workers` fetches run concurrently
//! - **Pluggable readers**: a [`SourceReader`] per source type, with a JSON
//!   Feed reader built in
//! - **Fetch history**: every fetch is recorded, and a successful one bounds
//!   what the next fetch returns
//!
//! Saved items are queued for indexing; indexing in turn feeds grouping.
//!
//! # Example
//!
//! ```no_run
//! use newsdesk::loader::{ContentLoaderManager, LoaderConfig, ReaderRegistry};
//! use newsdesk::news::news_type_spec;
//! use newsdesk::search::{IndexManager, SearchConfig};
//! use newsdesk::state::create_in_memory_store;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let stores = create_in_memory_store();
//! let news_type = Arc::new(news_type_spec(None, None));
//! let index = Arc::new(IndexManager::open(SearchConfig::default(), &[news_type.clone()])?);
//!
//! let config = LoaderConfig::default();
//! let readers = ReaderRegistry::with_defaults(&config)?;
//! let loader = ContentLoaderManager::start(
//!     config,
//!     stores.sources.clone(),
//!     stores.news.clone(),
//!     index,
//!     news_type,
//!     readers,
//! )
//! .await?;
//!
//! println!("{} sources scheduled", loader.schedule_snapshot().len());
//! loader.shutdown();
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod history;
mod manager;
mod metrics;
mod reader;
mod schedule;

pub use config::{LoaderConfig, LoaderConfigBuilder};
pub use error::{LoaderError, LoaderResult};
pub use history::FetchHistoryCache;
pub use manager::ContentLoaderManager;
pub use metrics::{init_loader_metrics, LOADER_METRICS};
pub use reader::{JsonFeedReader, ReaderRegistry, SourceReader};
pub use schedule::{FetchSchedule, ScheduleEntry};
