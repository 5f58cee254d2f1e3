//! Storage for the single in-progress capture draft.
//!
//! A draft holds the processed image between the moment the user captures it
//! and the moment the server-side capture exists. Only one draft is kept, under
//! the fixed id [`ACTIVE_DRAFT_ID`]; saving overwrites it atomically.

use crate::keys::record_file_name;
use crate::local::{ensure_dir, read_record, write_atomic};
use crate::traits::{StoreError, StoreResult};
use async_trait::async_trait;
use capsync_core::CaptureDraft;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const ACTIVE_DRAFT_ID: &str = "active";

#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Replace the active draft.
    async fn save(&self, draft: &CaptureDraft) -> StoreResult<()>;

    async fn load(&self) -> StoreResult<Option<CaptureDraft>>;

    /// Remove the active draft. Clearing when nothing is stored is not an error.
    async fn clear(&self) -> StoreResult<()>;
}

#[derive(Serialize, Deserialize)]
struct DraftRecord {
    id: String,
    #[serde(flatten)]
    draft: CaptureDraft,
}

/// Draft store writing `active.json` under a directory.
#[derive(Clone, Debug)]
pub struct LocalDraftStore {
    path: PathBuf,
}

impl LocalDraftStore {
    pub async fn new(base_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_path = base_path.into();
        ensure_dir(&base_path).await?;
        let path = base_path.join(record_file_name(ACTIVE_DRAFT_ID)?);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DraftStore for LocalDraftStore {
    async fn save(&self, draft: &CaptureDraft) -> StoreResult<()> {
        let record = DraftRecord {
            id: ACTIVE_DRAFT_ID.to_string(),
            draft: draft.clone(),
        };
        let data = serde_json::to_vec(&record)?;
        write_atomic(&self.path, &data).await?;

        tracing::debug!(
            node_id = %draft.node_id,
            size_bytes = draft.size,
            "Capture draft saved"
        );
        Ok(())
    }

    async fn load(&self) -> StoreResult<Option<CaptureDraft>> {
        let record: Option<DraftRecord> = read_record(&self.path, ACTIVE_DRAFT_ID).await?;
        Ok(record.map(|r| r.draft))
    }

    async fn clear(&self) -> StoreResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!("Capture draft cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

/// Draft store held in memory; clones share the same slot.
#[derive(Clone, Default)]
pub struct MemoryDraftStore {
    slot: Arc<Mutex<Option<CaptureDraft>>>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_slot<T>(&self, f: impl FnOnce(&mut Option<CaptureDraft>) -> T) -> T {
        let mut guard = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn save(&self, draft: &CaptureDraft) -> StoreResult<()> {
        self.with_slot(|slot| *slot = Some(draft.clone()));
        Ok(())
    }

    async fn load(&self) -> StoreResult<Option<CaptureDraft>> {
        Ok(self.with_slot(|slot| slot.clone()))
    }

    async fn clear(&self) -> StoreResult<()> {
        self.with_slot(|slot| *slot = None);
        Ok(())
    }
}
