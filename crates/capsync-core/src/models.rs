//! Domain models for queued uploads, drafts and encoded assets.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an upload intent.
///
/// `Uploading` is only ever observed while the queue engine owns the transfer;
/// persisted records found in that state on startup are downgraded to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Failed,
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadStatus::Pending => write!(f, "pending"),
            UploadStatus::Uploading => write!(f, "uploading"),
            UploadStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Last failure recorded against an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// A durable request to transfer one capture's image to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadIntent {
    pub capture_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(with = "base64_bytes")]
    pub payload: Bytes,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub status: UploadStatus,
    pub attempt_count: u32,
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<LastError>,
}

impl UploadIntent {
    /// Build a fresh pending intent.
    pub fn new(new: NewIntent, now: DateTime<Utc>) -> Self {
        let size = new.payload.len() as u64;
        Self {
            capture_id: new.capture_id,
            created_at: new.created_at.unwrap_or(now),
            updated_at: now,
            payload: new.payload,
            file_name: new.file_name,
            mime_type: new.mime_type,
            size,
            status: UploadStatus::Pending,
            attempt_count: 0,
            next_attempt_at: None,
            last_error: None,
        }
    }

    /// Pending and either unscheduled or scheduled at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == UploadStatus::Pending && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Payload-free view with transient progress attached.
    pub fn view(&self, progress: Option<UploadProgress>) -> IntentView {
        IntentView {
            capture_id: self.capture_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            file_name: self.file_name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size,
            status: self.status,
            attempt_count: self.attempt_count,
            next_attempt_at: self.next_attempt_at,
            last_error: self.last_error.clone(),
            progress,
        }
    }
}

/// Input accepted by the queue's `enqueue` operation.
#[derive(Debug, Clone)]
pub struct NewIntent {
    pub capture_id: String,
    pub payload: Bytes,
    pub file_name: String,
    pub mime_type: String,
    /// Defaults to the enqueue time when absent.
    pub created_at: Option<DateTime<Utc>>,
}

impl NewIntent {
    pub fn from_asset(capture_id: impl Into<String>, asset: &EncodedAsset) -> Self {
        Self {
            capture_id: capture_id.into(),
            payload: asset.payload.clone(),
            file_name: asset.file_name.clone(),
            mime_type: asset.mime_type.clone(),
            created_at: None,
        }
    }
}

/// Bytes sent so far for the active transfer. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub loaded: u64,
    pub total: Option<u64>,
}

/// An intent as exposed to observers: no payload, plus live progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentView {
    pub capture_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub status: UploadStatus,
    pub attempt_count: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    pub progress: Option<UploadProgress>,
}

/// Point-in-time view of the whole queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Monotonic; a higher revision always reflects a later state.
    pub revision: u64,
    /// Ordered by `created_at` ascending.
    pub items: Vec<IntentView>,
    pub persistence_error: Option<String>,
}

impl QueueSnapshot {
    pub fn get(&self, capture_id: &str) -> Option<&IntentView> {
        self.items.iter().find(|item| item.capture_id == capture_id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn count_with_status(&self, status: UploadStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }
}

/// The single in-progress capture that survives a restart before the
/// server-side capture exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureDraft {
    pub node_id: String,
    #[serde(default)]
    pub node_name: Option<String>,
    pub checkin_token: String,
    pub captured_at: DateTime<Utc>,
    #[serde(with = "base64_bytes")]
    pub payload: Bytes,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

impl CaptureDraft {
    pub fn from_asset(
        asset: &EncodedAsset,
        node_id: impl Into<String>,
        node_name: Option<String>,
        checkin_token: impl Into<String>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_name,
            checkin_token: checkin_token.into(),
            captured_at,
            payload: asset.payload.clone(),
            file_name: asset.file_name.clone(),
            mime_type: asset.mime_type.clone(),
            size: asset.size,
        }
    }
}

/// Output of the image preprocessor.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAsset {
    pub payload: Bytes,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub original_size: u64,
}

/// Capture record as returned by the server. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureRecord {
    pub id: String,
    pub node_id: Option<String>,
    pub state: Option<String>,
    pub visibility: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
}

/// Serde adapter storing binary payloads as standard base64 strings.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
