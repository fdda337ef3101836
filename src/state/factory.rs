use crate::config::{StateBackend, StateConfig};
use crate::error::{AppError, Result};
use crate::state::{InMemoryStore, NewsStore, SledStore, SourceStore};
use std::sync::Arc;

/// Both store roles, served by one backend
#[derive(Clone)]
pub struct StoreHandles {
    pub news: Arc<dyn NewsStore>,
    pub sources: Arc<dyn SourceStore>,
}

impl StoreHandles {
    fn from_backend<S>(store: S) -> Self
    where
        S: NewsStore + SourceStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            news: store.clone(),
            sources: store,
        }
    }
}

/// Create the stores based on configuration
pub fn create_store(config: &StateConfig) -> Result<StoreHandles> {
    match config.backend {
        StateBackend::Sled => {
            let path = config.path.as_ref().ok_or_else(|| {
                AppError::Configuration("Sled backend requires 'path' configuration".to_string())
            })?;

            tracing::info!(path = ?path, "Initializing Sled storage backend");
            Ok(StoreHandles::from_backend(SledStore::new(path)?))
        }

        StateBackend::Memory => Ok(create_in_memory_store()),
    }
}

/// Create an in-memory store (for testing and development)
pub fn create_in_memory_store() -> StoreHandles {
    tracing::info!("Initializing in-memory storage backend");
    StoreHandles::from_backend(InMemoryStore::new())
}
