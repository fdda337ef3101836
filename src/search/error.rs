//! Search index errors

use crate::error::AppError;

pub type SearchResult<T> = std::result::Result<T, SearchError>;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Opening or rebuilding the index failed
    #[error("Failed to open search index: {0}")]
    IndexInitFailed(String),

    /// Field definitions conflict or a field is unknown
    #[error("Invalid index schema: {0}")]
    SchemaError(String),

    #[error("Cannot build query: {0}")]
    QueryFailed(String),

    /// A batch could not be applied or committed
    #[error("Indexing failed: {0}")]
    IndexingFailed(String),

    /// Unique lookup found nothing
    #[error("No document of type {type_name} with id {id}")]
    NotFound { type_name: String, id: String },

    /// The writer died or was poisoned underneath us
    #[error("Index writer already closed: {0}")]
    AlreadyClosed(String),

    /// The index was closed through `close()`
    #[error("Index is closed")]
    Closed,

    #[error("Index manager has been shut down")]
    ShutDown,

    #[error("Index directory error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid search configuration: {0}")]
    InvalidConfiguration(String),

    /// Any other failure reported by tantivy
    #[error("Search engine error: {0}")]
    Engine(String),
}

impl SearchError {
    /// Map a tantivy error, recognizing a writer that died underneath us
    pub(crate) fn from_tantivy(err: tantivy::TantivyError) -> Self {
        if is_already_closed(&err) {
            SearchError::AlreadyClosed(err.to_string())
        } else {
            SearchError::Engine(err.to_string())
        }
    }
}

/// A killed or poisoned writer is tantivy's way of saying the index is gone
pub(crate) fn is_already_closed(err: &tantivy::TantivyError) -> bool {
    matches!(
        err,
        tantivy::TantivyError::ErrorInThread(_) | tantivy::TantivyError::Poisoned
    )
}

impl From<tantivy::TantivyError> for SearchError {
    fn from(err: tantivy::TantivyError) -> Self {
        SearchError::from_tantivy(err)
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::NotFound { .. } => AppError::NotFound(err.to_string()),
            SearchError::InvalidConfiguration(msg) => AppError::Configuration(msg),
            SearchError::ShutDown => AppError::ShutDown(err.to_string()),
            SearchError::Io(err) => AppError::Io(err),
            _ => AppError::Search(err.to_string()),
        }
    }
}
