//! Error types for the content loader

use crate::error::AppError;
use crate::models::SourceType;

/// Result type for loader operations
pub type LoaderResult<T> = std::result::Result<T, LoaderError>;

/// Errors that can occur while loading content
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// No reader registered for a source type
    #[error("No reader for source type {0}")]
    ReaderNotFound(SourceType),

    /// Request to a source failed or timed out
    #[error("HTTP error: {0}")]
    Http(String),

    /// Source answered with content that could not be parsed
    #[error("Failed to parse source content: {0}")]
    Parse(String),

    /// Store of record failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Loader was shut down
    #[error("Loader is shut down")]
    ShutDown,
}

impl LoaderError {
    /// Label used in fetch metrics
    pub fn kind(&self) -> &'static str {
        match self {
            LoaderError::ReaderNotFound(_) => "no_reader",
            LoaderError::Http(_) => "http",
            LoaderError::Parse(_) => "parse",
            LoaderError::Storage(_) => "storage",
            LoaderError::ConfigurationError(_) => "configuration",
            LoaderError::ShutDown => "shut_down",
        }
    }
}

impl From<LoaderError> for AppError {
    fn from(err: LoaderError) -> Self {
        match err {
            LoaderError::Http(msg) => AppError::Network(msg),
            LoaderError::Parse(msg) => AppError::Serialization(msg),
            LoaderError::Storage(msg) => AppError::Storage(msg),
            LoaderError::ConfigurationError(msg) => AppError::Configuration(msg),
            LoaderError::ShutDown => AppError::ShutDown("content loader".to_string()),
            LoaderError::ReaderNotFound(_) => AppError::NotFound(err.to_string()),
        }
    }
}

impl From<AppError> for LoaderError {
    fn from(err: AppError) -> Self {
        LoaderError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for LoaderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LoaderError::Parse(err.to_string())
        } else {
            LoaderError::Http(err.to_string())
        }
    }
}
