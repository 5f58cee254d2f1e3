use crate::keys::{key_from_file_name, record_file_name};
use crate::traits::{sort_by_creation, DurableStore, StoreError, StoreResult};
use crate::StoreBackend;
use async_trait::async_trait;
use capsync_core::UploadIntent;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Local filesystem intent store: one JSON record per capture id.
#[derive(Clone, Debug)]
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    /// Create a new LocalStore rooted at `base_path`, creating the directory if needed.
    pub async fn new(base_path: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_path = base_path.into();
        ensure_dir(&base_path).await?;
        Ok(LocalStore { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn record_path(&self, capture_id: &str) -> StoreResult<PathBuf> {
        Ok(self.base_path.join(record_file_name(capture_id)?))
    }
}

#[async_trait]
impl DurableStore for LocalStore {
    async fn put(&self, intent: &UploadIntent) -> StoreResult<()> {
        let path = self.record_path(&intent.capture_id)?;
        let start = std::time::Instant::now();

        let data = serde_json::to_vec(intent)?;
        write_atomic(&path, &data).await?;

        tracing::debug!(
            path = %path.display(),
            capture_id = %intent.capture_id,
            status = %intent.status,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Intent record written"
        );

        Ok(())
    }

    async fn get(&self, capture_id: &str) -> StoreResult<Option<UploadIntent>> {
        let path = self.record_path(capture_id)?;
        read_record(&path, capture_id).await
    }

    async fn delete(&self, capture_id: &str) -> StoreResult<()> {
        let path = self.record_path(capture_id)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(
                    path = %path.display(),
                    capture_id = %capture_id,
                    "Intent record deleted"
                );
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn list(&self) -> StoreResult<Vec<UploadIntent>> {
        let mut entries = fs::read_dir(&self.base_path).await.map_err(|e| {
            StoreError::Unavailable(format!(
                "Failed to read store directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        let mut intents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(key) = file_name.to_str().and_then(key_from_file_name) else {
                continue;
            };

            match read_record::<UploadIntent>(&entry.path(), key).await {
                Ok(Some(intent)) => intents.push(intent),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        path = %entry.path().display(),
                        error = %e,
                        "Skipping unreadable intent record"
                    );
                }
            }
        }

        sort_by_creation(&mut intents);
        Ok(intents)
    }

    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Local
    }
}

pub(crate) async fn ensure_dir(path: &Path) -> StoreResult<()> {
    fs::create_dir_all(path).await.map_err(|e| {
        StoreError::Unavailable(format!(
            "Failed to create store directory {}: {}",
            path.display(),
            e
        ))
    })
}

/// Read and decode one record; a missing file is `Ok(None)`.
pub(crate) async fn read_record<T: serde::de::DeserializeOwned>(
    path: &Path,
    key: &str,
) -> StoreResult<Option<T>> {
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::Io(e)),
    };

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

/// Replace `path` with `data` so that readers see either the old or the new
/// content, never a mix.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::InvalidKey(format!("{} has no parent", path.display())))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StoreError::InvalidKey(format!("{} has no file name", path.display())))?;
    let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    let result = async {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(StoreError::Io(e));
    }

    // Persist the rename itself. Not every platform allows opening a directory.
    if let Ok(dir_handle) = fs::File::open(dir).await {
        let _ = dir_handle.sync_all().await;
    }

    Ok(())
}
