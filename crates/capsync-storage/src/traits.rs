//! Durable store abstraction
//!
//! This module defines the DurableStore trait that all intent store backends must implement.

use async_trait::async_trait;
use capsync_core::{StoreBackend, UploadIntent};
use thiserror::Error;

/// Store operation errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend cannot be used at all (missing directory, quota, closed handle).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid record key: {0}")]
    InvalidKey(String),

    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable keyed storage for upload intents.
///
/// Each call is an atomic unit: a `put` either fully replaces the record for
/// its capture id or leaves the previous record untouched. The payload and the
/// metadata of an intent are always persisted together.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert or replace the record keyed by `intent.capture_id`.
    async fn put(&self, intent: &UploadIntent) -> StoreResult<()>;

    async fn get(&self, capture_id: &str) -> StoreResult<Option<UploadIntent>>;

    /// Remove the record. Deleting a missing record is not an error.
    async fn delete(&self, capture_id: &str) -> StoreResult<()>;

    /// All records, ordered by `created_at` ascending.
    async fn list(&self) -> StoreResult<Vec<UploadIntent>>;

    fn backend_type(&self) -> StoreBackend;
}

/// Ordering used by every `list` implementation. Ties break on capture id so
/// the order is stable across backends.
pub(crate) fn sort_by_creation(intents: &mut [UploadIntent]) {
    intents.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.capture_id.cmp(&b.capture_id))
    });
}
