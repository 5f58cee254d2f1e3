//! In-memory intent store, used for ephemeral hosts and tests.

use crate::traits::{sort_by_creation, DurableStore, StoreError, StoreResult};
use crate::StoreBackend;
use async_trait::async_trait;
use capsync_core::UploadIntent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Intent store backed by a `HashMap`.
///
/// Clones share the same records. [`MemoryStore::set_unavailable`] makes every
/// operation fail with [`StoreError::Unavailable`] until it is switched back,
/// which is how a host without usable persistence is simulated.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<String, UploadIntent>>>,
    unavailable: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record without going through the trait (bypasses the availability switch).
    pub fn insert(&self, intent: UploadIntent) {
        self.lock().insert(intent.capture_id.clone(), intent);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn contains(&self, capture_id: &str) -> bool {
        self.lock().contains_key(capture_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful `put` and `delete` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, UploadIntent>> {
        // A poisoned map still holds consistent records: every mutation is a single insert or remove.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(
                "in-memory store switched off".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn put(&self, intent: &UploadIntent) -> StoreResult<()> {
        self.check_available()?;
        self.lock()
            .insert(intent.capture_id.clone(), intent.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, capture_id: &str) -> StoreResult<Option<UploadIntent>> {
        self.check_available()?;
        Ok(self.lock().get(capture_id).cloned())
    }

    async fn delete(&self, capture_id: &str) -> StoreResult<()> {
        self.check_available()?;
        self.lock().remove(capture_id);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<UploadIntent>> {
        self.check_available()?;
        let mut intents: Vec<UploadIntent> = self.lock().values().cloned().collect();
        sort_by_creation(&mut intents);
        Ok(intents)
    }

    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Memory
    }
}
