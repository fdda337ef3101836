//! Single-writer full-text index powered by Tantivy
//!
//! Every entity type that should be searchable declares itself through an
//! [`IndexTypeSpec`]. All specs share one Tantivy index:
//!
//! - **Writes** go through [`IndexManager::index`], which queues an
//!   [`IndexMutationBatch`] for the one indexing thread. A batch is applied
//!   and committed as a unit, or rolled back as a unit.
//! - **Reads** go through [`IndexSearch`] and see the last committed
//!   snapshot. Writes become visible only on commit.
//! - **Reindexing** a type clears its documents and replays its record
//!   provider in chunks.
//!
//! ```text
//!   producers ──index(batch)──▶ IndexManager ──queue──▶ IndexingThread
//!                                    │                       │
//!                                    │                  SearchIndex
//!                                    │               (writer, commit)
//!                                    ▼                       │
//!                               IndexSearch ◀── reader ──────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use newsdesk::search::{
//!     FieldDef, IndexManager, IndexMutationBatch, IndexTypeSpec, IndexableRecord,
//!     SearchConfig, SearchOptions,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let notes = Arc::new(IndexTypeSpec::new("note", vec![FieldDef::text("body")]));
//! let manager = IndexManager::open(SearchConfig::default(), &[notes.clone()])?;
//!
//! let record = IndexableRecord::insert("1").with_field("body", "Hello index");
//! manager.index(IndexMutationBatch::new(notes.clone(), vec![record]))?;
//!
//! let hits = manager
//!     .searcher()
//!     .search_text("hello", &notes, None, &SearchOptions::default())?;
//! println!("{} hits", hits.total_hits);
//! manager.shutdown()?;
//! # Ok(())
//! # }
//! ```

mod analyzers;
mod config;
mod error;
mod index;
mod indexing;
mod manager;
mod metrics;
mod query;
mod schema;
mod service;

pub use analyzers::{
    analyzer_name, document_locale, normalize_locale, AnalyzerLanguage, LocaleAnalyzers,
    DEFAULT_ANALYZER, UNDETERMINED_LOCALE,
};
pub use config::{SearchConfig, SearchConfigBuilder};
pub use error::{SearchError, SearchResult};
pub use index::{IndexHandle, SearchIndex};
pub use indexing::{IndexingCommand, IndexingState, IndexingThread};
pub use manager::{IndexManager, ReindexSummary};
pub use metrics::{init_search_metrics, SEARCH_METRICS};
pub use query::{
    all_of, any_of, filter, SearchCursor, SearchOptions, SearchSort, SortKey, SortOrder,
};
pub use schema::{
    document_uid, FieldCatalog, FieldDef, FieldPolicy, FieldType, FieldValue, IndexMutationBatch,
    IndexTypeSpec, IndexableRecord, Operation, PostIndexHook, RecordProvider, ResolvedField,
    SystemFields, ID_FIELD, LOCALE_FIELD, TYPE_FIELD, UID_FIELD,
};
pub use service::{
    GroupedResponse, IndexSearch, SearchGroup, SearchHit, SearchResponse, SimilarityQuery,
    SIMILARITY_BOOST_FACTOR, SIMILARITY_MIN_WORD_LENGTH,
};
