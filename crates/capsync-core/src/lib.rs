//! capsync core library
//!
//! This crate provides the domain models, error types, events and configuration
//! shared by every capsync component.

pub mod config;
pub mod events;
pub mod models;
pub mod store_types;
pub mod transfer_error;

// Re-export commonly used types
pub use config::{Config, PreprocessConfig, QueueConfig};
pub use events::{CaptureEvent, EventBus};
pub use models::{
    CaptureDraft, CaptureRecord, EncodedAsset, IntentView, LastError, NewIntent, QueueSnapshot,
    UploadIntent, UploadProgress, UploadStatus,
};
pub use store_types::StoreBackend;
pub use transfer_error::TransferError;
