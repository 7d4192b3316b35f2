use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{file_store::FileStorage, memory_store::MemoryStorage};
use crate::config::StoreConfig;

/// The Storage trait abstracts durable client-side key/value persistence
/// (get, put, delete). Values are opaque strings; keys are per-app.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, String>;
    async fn put(&self, key: &str, value: &str) -> Result<(), String>;
    async fn delete(&self, key: &str) -> Result<(), String>;
    fn is_durable(&self) -> bool {
        // Real backends survive restarts; the in-memory one overrides this
        // so startup logs can say sessions will not persist.
        true
    }
}

/// Creates a concrete storage implementation based on the StoreConfig.
pub fn create_storage(config: &StoreConfig) -> Arc<dyn Storage> {
    match config {
        StoreConfig::File(file_config) => {
            info!(path = %file_config.path, "Using file-backed session storage");
            Arc::new(FileStorage::new(&file_config.path))
        }
        StoreConfig::Memory => {
            info!("Using in-memory session storage; sessions will not survive a restart");
            Arc::new(MemoryStorage::new())
        }
    }
}
