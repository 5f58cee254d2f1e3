//! Capture submission: draft staging, server-side capture creation, enqueue.

use std::sync::Arc;

use capsync_core::{CaptureDraft, CaptureRecord, EncodedAsset, NewIntent};
use capsync_storage::DraftStore;
use chrono::Utc;

use crate::context::{CreateCaptureRequest, IntentCreator};
use crate::error::SubmitError;
use crate::queue::{EnqueueOutcome, UploadQueue};

/// Result of handing a draft over to the upload queue.
#[derive(Debug, Clone)]
pub struct SubmittedCapture {
    pub capture: CaptureRecord,
    pub outcome: EnqueueOutcome,
}

pub struct CaptureSubmitter {
    drafts: Arc<dyn DraftStore>,
    creator: Arc<dyn IntentCreator>,
    queue: UploadQueue,
}

impl CaptureSubmitter {
    pub fn new(
        drafts: Arc<dyn DraftStore>,
        creator: Arc<dyn IntentCreator>,
        queue: UploadQueue,
    ) -> Self {
        Self {
            drafts,
            creator,
            queue,
        }
    }

    /// Keep a processed image as the active draft. A draft that cannot be
    /// saved is still returned; it just will not survive a restart.
    pub async fn stage(
        &self,
        asset: &EncodedAsset,
        node_id: &str,
        node_name: Option<String>,
        checkin_token: &str,
    ) -> CaptureDraft {
        let draft = CaptureDraft::from_asset(asset, node_id, node_name, checkin_token, Utc::now());
        match self.drafts.save(&draft).await {
            Ok(()) => tracing::info!(node_id, size_bytes = draft.size, "Capture draft saved"),
            Err(e) => tracing::warn!(node_id, error = %e, "Capture draft could not be saved"),
        }
        draft
    }

    pub async fn resume(&self) -> Result<Option<CaptureDraft>, SubmitError> {
        Ok(self.drafts.load().await?)
    }

    pub async fn discard(&self) -> Result<(), SubmitError> {
        Ok(self.drafts.clear().await?)
    }

    /// Submit the active draft.
    #[tracing::instrument(skip(self))]
    pub async fn submit_draft(&self) -> Result<SubmittedCapture, SubmitError> {
        let draft = self.drafts.load().await?.ok_or(SubmitError::NoDraft)?;
        self.submit(&draft).await
    }

    /// Create the server-side capture for `draft` and queue its image.
    ///
    /// The draft is cleared only once the intent store holds the intent.
    pub async fn submit(&self, draft: &CaptureDraft) -> Result<SubmittedCapture, SubmitError> {
        let capture = self
            .creator
            .create_capture(&CreateCaptureRequest {
                node_id: draft.node_id.clone(),
                checkin_token: draft.checkin_token.clone(),
            })
            .await?;
        tracing::info!(capture_id = %capture.id, node_id = %draft.node_id, "Capture created");

        let outcome = self.queue.enqueue(intent_for(&capture.id, draft)).await?;

        // The draft is the only durable copy until the intent is saved.
        if outcome == EnqueueOutcome::EnqueuedInMemory {
            tracing::warn!(
                capture_id = %capture.id,
                "Upload intent not persisted, keeping capture draft"
            );
        } else if let Err(e) = self.drafts.clear().await {
            tracing::warn!(capture_id = %capture.id, error = %e, "Could not clear submitted draft");
        }

        Ok(SubmittedCapture { capture, outcome })
    }

    /// Re-queue the image of a capture that already exists server-side and
    /// make it eligible immediately.
    pub async fn resubmit(
        &self,
        capture_id: &str,
        draft: &CaptureDraft,
    ) -> Result<EnqueueOutcome, SubmitError> {
        let outcome = self.queue.enqueue(intent_for(capture_id, draft)).await?;
        self.queue.retry_now(capture_id).await;
        Ok(outcome)
    }
}

fn intent_for(capture_id: &str, draft: &CaptureDraft) -> NewIntent {
    NewIntent {
        capture_id: capture_id.to_string(),
        payload: draft.payload.clone(),
        file_name: draft.file_name.clone(),
        mime_type: draft.mime_type.clone(),
        created_at: None,
    }
}
