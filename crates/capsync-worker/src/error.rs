use capsync_core::TransferError;
use capsync_storage::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid upload intent: {0}")]
    InvalidIntent(String),

    #[error("Upload queue has shut down")]
    Closed,
}

/// Failures of the draft submission workflow.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("No capture draft to submit")]
    NoDraft,

    #[error("Capture creation failed: {0}")]
    Create(#[from] TransferError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Draft store error: {0}")]
    Store(#[from] StoreError),
}
