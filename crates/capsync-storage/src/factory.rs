use crate::{
    DraftStore, DurableStore, LocalDraftStore, LocalStore, MemoryDraftStore, MemoryStore,
    StoreBackend, StoreResult,
};
use capsync_core::Config;
use std::sync::Arc;

/// Create an intent store based on configuration
pub async fn create_store(config: &Config) -> StoreResult<Arc<dyn DurableStore>> {
    match config.store_backend {
        StoreBackend::Local => {
            let store = LocalStore::new(config.intents_dir()).await?;
            tracing::info!(path = %store.base_path().display(), "Using local intent store");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory intent store; queued uploads will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Create a draft store based on configuration
pub async fn create_draft_store(config: &Config) -> StoreResult<Arc<dyn DraftStore>> {
    match config.store_backend {
        StoreBackend::Local => Ok(Arc::new(LocalDraftStore::new(config.drafts_dir()).await?)),
        StoreBackend::Memory => Ok(Arc::new(MemoryDraftStore::new())),
    }
}
