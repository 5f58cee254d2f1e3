//! Collaborators the queue and the capture workflow call out to.
//!
//! The HTTP client implements these; tests plug in scripted fakes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use capsync_core::{CaptureRecord, TransferError};
use serde::Serialize;

/// Callback receiving `(loaded, total)` byte counts while a transfer is in flight.
pub type ProgressReporter = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// One transfer attempt for an upload intent.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub capture_id: String,
    pub payload: Bytes,
    pub file_name: String,
    pub mime_type: String,
}

#[async_trait]
pub trait Uploader: Send + Sync {
    /// Transfer the payload of one intent. Progress reports are optional.
    async fn upload(
        &self,
        request: UploadRequest,
        progress: ProgressReporter,
    ) -> Result<CaptureRecord, TransferError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateCaptureRequest {
    pub node_id: String,
    pub checkin_token: String,
}

#[async_trait]
pub trait IntentCreator: Send + Sync {
    /// Create the server-side capture record an upload will attach to.
    async fn create_capture(
        &self,
        request: &CreateCaptureRequest,
    ) -> Result<CaptureRecord, TransferError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionRequest {
    pub target_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    pub details: serde_json::Value,
}

#[async_trait]
pub trait CaptureModerator: Send + Sync {
    async fn transition_capture(
        &self,
        capture_id: &str,
        admin_token: &str,
        request: &TransitionRequest,
    ) -> Result<(), TransferError>;
}
