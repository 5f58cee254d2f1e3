//! Test helpers: scripted collaborators and queue builders.
//!
//! Run from workspace root: `cargo test -p capsync-worker`.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use capsync_core::{
    CaptureRecord, EventBus, NewIntent, QueueConfig, QueueSnapshot, StoreBackend, TransferError,
    UploadIntent,
};
use capsync_storage::{DurableStore, MemoryStore, StoreError, StoreResult};
use capsync_worker::{
    Connectivity, CreateCaptureRequest, IntentCreator, ProgressReporter, UploadQueue,
    UploadRequest, Uploader,
};
use tokio::sync::Semaphore;

pub const WAIT: Duration = Duration::from_secs(5);

/// Uploader replaying a script of outcomes; once the script runs out every
/// call succeeds. Optionally holds each call until a permit is released.
#[derive(Default)]
pub struct ScriptedUploader {
    script: Mutex<VecDeque<Result<(), TransferError>>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    progress_steps: u64,
}

impl ScriptedUploader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_script(outcomes: Vec<Result<(), TransferError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            ..Self::default()
        })
    }

    /// Every call blocks until a permit is added to the returned semaphore.
    pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        Self::gated_with_script(Vec::new())
    }

    pub fn gated_with_script(
        outcomes: Vec<Result<(), TransferError>>,
    ) -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let uploader = Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            gate: Some(gate.clone()),
            ..Self::default()
        });
        (uploader, gate)
    }

    pub fn reporting_progress(steps: u64) -> Arc<Self> {
        Arc::new(Self {
            progress_steps: steps,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Uploader for ScriptedUploader {
    async fn upload(
        &self,
        request: UploadRequest,
        progress: ProgressReporter,
    ) -> Result<CaptureRecord, TransferError> {
        self.calls.lock().unwrap().push(request.capture_id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let total = request.payload.len() as u64;
        for step in 1..=self.progress_steps {
            progress(total * step / self.progress_steps, Some(total));
            tokio::task::yield_now().await;
        }

        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome.map(|()| CaptureRecord {
            id: request.capture_id,
            state: Some("pending_verification".to_string()),
            ..CaptureRecord::default()
        })
    }
}

/// Uploader that panics for the listed capture ids and succeeds otherwise.
pub struct PanickingUploader {
    panic_on: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl PanickingUploader {
    pub fn for_ids(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            panic_on: ids.iter().map(|id| id.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Uploader for PanickingUploader {
    async fn upload(
        &self,
        request: UploadRequest,
        _progress: ProgressReporter,
    ) -> Result<CaptureRecord, TransferError> {
        self.calls.lock().unwrap().push(request.capture_id.clone());
        if self.panic_on.contains(&request.capture_id) {
            panic!("uploader blew up on {}", request.capture_id);
        }
        Ok(CaptureRecord {
            id: request.capture_id,
            ..CaptureRecord::default()
        })
    }
}

/// Memory store whose writes fail for selected capture ids only.
#[derive(Clone, Default)]
pub struct SelectiveStore {
    pub inner: MemoryStore,
    failing: Arc<Mutex<Vec<String>>>,
}

impl SelectiveStore {
    pub fn failing_for(ids: &[&str]) -> Self {
        Self {
            inner: MemoryStore::new(),
            failing: Arc::new(Mutex::new(ids.iter().map(|id| id.to_string()).collect())),
        }
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn check(&self, capture_id: &str) -> StoreResult<()> {
        if self.failing.lock().unwrap().iter().any(|id| id == capture_id) {
            return Err(StoreError::Unavailable(format!("write refused for {capture_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for SelectiveStore {
    async fn put(&self, intent: &UploadIntent) -> StoreResult<()> {
        self.check(&intent.capture_id)?;
        self.inner.put(intent).await
    }

    async fn get(&self, capture_id: &str) -> StoreResult<Option<UploadIntent>> {
        self.inner.get(capture_id).await
    }

    async fn delete(&self, capture_id: &str) -> StoreResult<()> {
        self.check(capture_id)?;
        self.inner.delete(capture_id).await
    }

    async fn list(&self) -> StoreResult<Vec<UploadIntent>> {
        self.inner.list().await
    }

    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Memory
    }
}

/// Intent creator handing out sequential capture ids.
#[derive(Default)]
pub struct SequentialCreator {
    created: Mutex<Vec<CreateCaptureRequest>>,
    fail_with: Option<u16>,
}

impl SequentialCreator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(status),
            ..Self::default()
        })
    }

    pub fn created(&self) -> Vec<CreateCaptureRequest> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl IntentCreator for SequentialCreator {
    async fn create_capture(
        &self,
        request: &CreateCaptureRequest,
    ) -> Result<CaptureRecord, TransferError> {
        if let Some(status) = self.fail_with {
            return Err(TransferError::http_status(status));
        }
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        Ok(CaptureRecord {
            id: format!("cap_{}", created.len()),
            node_id: Some(request.node_id.clone()),
            state: Some("pending_upload".to_string()),
            ..CaptureRecord::default()
        })
    }
}

/// Backoff short enough for tests to run through every attempt.
pub fn fast_config() -> QueueConfig {
    QueueConfig {
        initial_backoff_ms: 5,
        max_backoff_ms: 20,
        offline_poll_interval_ms: 1_000,
        ..QueueConfig::default()
    }
}

pub fn new_intent(capture_id: &str, size: usize) -> NewIntent {
    NewIntent {
        capture_id: capture_id.to_string(),
        payload: Bytes::from(vec![0xAB; size]),
        file_name: format!("{capture_id}.jpg"),
        mime_type: "image/jpeg".to_string(),
        created_at: None,
    }
}

pub async fn start_queue(
    store: Arc<dyn DurableStore>,
    uploader: Arc<dyn Uploader>,
    config: QueueConfig,
    connectivity: &Connectivity,
) -> (UploadQueue, EventBus) {
    let events = EventBus::new();
    let queue = UploadQueue::start(store, uploader, events.clone(), config, connectivity.subscribe()).await;
    (queue, events)
}

pub async fn wait_for(
    queue: &UploadQueue,
    predicate: impl Fn(&QueueSnapshot) -> bool,
) -> QueueSnapshot {
    within(queue.wait_for(predicate)).await.unwrap()
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting for the queue")
}
