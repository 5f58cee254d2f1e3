//! Upload queue engine.
//!
//! Owns every upload intent from enqueue until the server acknowledges the
//! image. At most one transfer runs at a time; failed transfers are retried
//! with exponential backoff and parked as `failed` once retries run out.
//!
//! Every state change is persisted through a [`DurableStore`] before the
//! matching snapshot goes out. Store writes are serialized so records land in
//! the order their mutations happened. A failed write does not stop the queue:
//! it keeps working in memory and reports the problem in
//! [`QueueSnapshot::persistence_error`] for as long as any tracked record is
//! unsaved or any deleted record is still on disk. The first successful write
//! after an outage rewrites those records.
//!
//! [`UploadQueue::shutdown`] stops the scheduling loop without waiting for an
//! in-flight transfer; its record stays `uploading` on disk and is downgraded
//! to `pending` by the next [`UploadQueue::start`].

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use capsync_core::{
    CaptureEvent, EventBus, NewIntent, QueueConfig, QueueSnapshot, TransferError, UploadIntent,
    UploadProgress, UploadStatus,
};
use capsync_storage::{DurableStore, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bridge::{SnapshotBridge, Subscription};
use crate::context::{ProgressReporter, UploadRequest, Uploader};
use crate::error::QueueError;
use crate::retry::{jitter_sample, plan_failure, FailurePlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// Tracked and scheduled, but the intent store refused the record. It
    /// will not survive a restart unless a later write succeeds.
    EnqueuedInMemory,
    /// An intent with this capture id is already tracked; nothing changed.
    AlreadyTracked,
}

struct TrackedIntent {
    intent: UploadIntent,
    /// Distinguishes a re-enqueued intent from a removed one with the same id.
    generation: u64,
    progress: Option<UploadProgress>,
    /// The store holds the latest state of this record.
    persisted: bool,
}

/// The transfer currently holding the single-flight slot.
#[derive(Debug, Clone)]
struct Claim {
    capture_id: String,
    generation: u64,
}

#[derive(Default)]
struct QueueState {
    records: HashMap<String, TrackedIntent>,
    active: Option<Claim>,
    persistence_error: Option<String>,
    /// Removed intents whose delete failed; their records may still be on disk.
    stale_records: HashSet<String>,
    next_generation: u64,
    revision: u64,
}

impl QueueState {
    fn track(&mut self, intent: UploadIntent, persisted: bool) {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.records.insert(
            intent.capture_id.clone(),
            TrackedIntent {
                intent,
                generation,
                progress: None,
                persisted,
            },
        );
    }

    fn is_degraded(&self) -> bool {
        !self.stale_records.is_empty() || self.records.values().any(|t| !t.persisted)
    }

    fn record_put(&mut self, capture_id: &str, result: &StoreResult<()>) -> Written {
        let written = match result {
            Ok(()) => {
                if let Some(tracked) = self.records.get_mut(capture_id) {
                    tracked.persisted = true;
                }
                self.stale_records.remove(capture_id);
                Written::Saved
            }
            Err(StoreError::InvalidKey(reason)) => {
                // No write can ever succeed for this id.
                self.records.remove(capture_id);
                Written::Rejected(reason.clone())
            }
            Err(e) => {
                if let Some(tracked) = self.records.get_mut(capture_id) {
                    tracked.persisted = false;
                }
                self.persistence_error = Some(e.to_string());
                Written::Failed
            }
        };
        self.settle_persistence_error();
        written
    }

    fn record_delete(&mut self, capture_id: &str, result: &StoreResult<()>) -> Written {
        let written = match result {
            Ok(()) => {
                self.stale_records.remove(capture_id);
                Written::Saved
            }
            Err(e) => {
                self.stale_records.insert(capture_id.to_string());
                self.persistence_error = Some(e.to_string());
                Written::Failed
            }
        };
        self.settle_persistence_error();
        written
    }

    fn settle_persistence_error(&mut self) {
        if !self.is_degraded() {
            self.persistence_error = None;
        }
    }

    fn claimed_mut(&mut self, claim: &Claim) -> Option<&mut TrackedIntent> {
        self.records
            .get_mut(&claim.capture_id)
            .filter(|tracked| tracked.generation == claim.generation)
    }

    fn release(&mut self, claim: &Claim) {
        let holds_slot = self.active.as_ref().is_some_and(|active| {
            active.capture_id == claim.capture_id && active.generation == claim.generation
        });
        if holds_slot {
            self.active = None;
        }
    }

    /// Oldest due pending intent.
    fn next_eligible(&self, now: DateTime<Utc>) -> Option<&TrackedIntent> {
        self.records
            .values()
            .filter(|tracked| tracked.intent.is_due(now))
            .min_by(|a, b| {
                a.intent
                    .created_at
                    .cmp(&b.intent.created_at)
                    .then_with(|| a.intent.capture_id.cmp(&b.intent.capture_id))
            })
    }

    /// Earliest moment a pending intent becomes due.
    fn next_wake(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut wake: Option<DateTime<Utc>> = None;
        for tracked in self.records.values() {
            if tracked.intent.status != UploadStatus::Pending {
                continue;
            }
            match tracked.intent.next_attempt_at {
                None => return Some(now),
                Some(at) => wake = Some(wake.map_or(at, |current| current.min(at))),
            }
        }
        wake
    }

    fn claim_next(&mut self, now: DateTime<Utc>) -> (Option<(Claim, UploadRequest)>, Persist) {
        if self.active.is_some() {
            return (None, Persist::Nothing);
        }
        let Some(capture_id) = self
            .next_eligible(now)
            .map(|tracked| tracked.intent.capture_id.clone())
        else {
            return (None, Persist::Nothing);
        };
        let Some(tracked) = self.records.get_mut(&capture_id) else {
            return (None, Persist::Nothing);
        };

        tracked.intent.status = UploadStatus::Uploading;
        tracked.intent.updated_at = now;
        tracked.progress = Some(UploadProgress {
            loaded: 0,
            total: Some(tracked.intent.size),
        });

        let claim = Claim {
            capture_id: capture_id.clone(),
            generation: tracked.generation,
        };
        let request = UploadRequest {
            capture_id,
            payload: tracked.intent.payload.clone(),
            file_name: tracked.intent.file_name.clone(),
            mime_type: tracked.intent.mime_type.clone(),
        };
        let persist = Persist::Put(tracked.intent.clone());
        self.active = Some(claim.clone());
        (Some((claim, request)), persist)
    }

    fn snapshot(&mut self) -> QueueSnapshot {
        self.revision += 1;
        let mut items: Vec<_> = self
            .records
            .values()
            .map(|tracked| tracked.intent.view(tracked.progress))
            .collect();
        items.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.capture_id.cmp(&b.capture_id))
        });
        QueueSnapshot {
            revision: self.revision,
            items,
            persistence_error: self.persistence_error.clone(),
        }
    }
}

/// Store operation that makes a mutation durable. `Nothing` means no visible change.
enum Persist {
    Nothing,
    Put(UploadIntent),
    Delete(String),
}

/// What became of the store operation behind a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Written {
    Skipped,
    Saved,
    Failed,
    /// The store refused the key; the record was dropped from memory too.
    Rejected(String),
}

struct Inner {
    store: Arc<dyn DurableStore>,
    uploader: Arc<dyn Uploader>,
    events: EventBus,
    config: QueueConfig,
    state: Mutex<QueueState>,
    /// Serializes store writes so they land in mutation order.
    store_gate: tokio::sync::Mutex<()>,
    bridge: Arc<SnapshotBridge>,
    kick: Notify,
    online: watch::Receiver<bool>,
    closed: CancellationToken,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Mutate state, persist the result, then publish a snapshot.
    async fn apply<T>(
        &self,
        mutate: impl FnOnce(&mut QueueState, DateTime<Utc>) -> (T, Persist),
    ) -> T {
        self.apply_tracked(mutate).await.0
    }

    /// Like [`Inner::apply`], also reporting what the store made of the write.
    async fn apply_tracked<T>(
        &self,
        mutate: impl FnOnce(&mut QueueState, DateTime<Utc>) -> (T, Persist),
    ) -> (T, Written) {
        let _gate = self.store_gate.lock().await;
        let (value, persist) = {
            let mut state = self.lock_state();
            mutate(&mut *state, Utc::now())
        };

        let (capture_id, written) = match persist {
            Persist::Nothing => return (value, Written::Skipped),
            Persist::Put(intent) => {
                let result = self.store.put(&intent).await;
                let written = self.lock_state().record_put(&intent.capture_id, &result);
                (intent.capture_id, written)
            }
            Persist::Delete(capture_id) => {
                let result = self.store.delete(&capture_id).await;
                let written = self.lock_state().record_delete(&capture_id, &result);
                (capture_id, written)
            }
        };

        match &written {
            Written::Saved => self.resync().await,
            Written::Failed => tracing::warn!(
                capture_id = %capture_id,
                "Intent store write failed, continuing in memory"
            ),
            Written::Rejected(reason) => tracing::warn!(
                capture_id = %capture_id,
                reason = %reason,
                "Intent store rejected the capture id"
            ),
            Written::Skipped => {}
        }

        let snapshot = self.lock_state().snapshot();
        self.bridge.publish(snapshot);
        (value, written)
    }

    /// Rewrite unsaved records and retry failed deletes. Runs under the store
    /// gate after a successful write; stops at the first failure.
    async fn resync(&self) {
        let (puts, deletes) = {
            let state = self.lock_state();
            if !state.is_degraded() {
                return;
            }
            let puts: Vec<UploadIntent> = state
                .records
                .values()
                .filter(|tracked| !tracked.persisted)
                .map(|tracked| tracked.intent.clone())
                .collect();
            let deletes: Vec<String> = state
                .stale_records
                .iter()
                .filter(|id| !state.records.contains_key(*id))
                .cloned()
                .collect();
            (puts, deletes)
        };

        let pending = puts.len() + deletes.len();
        for intent in puts {
            let result = self.store.put(&intent).await;
            if self.lock_state().record_put(&intent.capture_id, &result) != Written::Saved {
                return;
            }
        }
        for capture_id in deletes {
            let result = self.store.delete(&capture_id).await;
            if self.lock_state().record_delete(&capture_id, &result) != Written::Saved {
                return;
            }
        }
        tracing::info!(records = pending, "Intent store recovered, unsaved records written");
    }

    /// Transient progress; only applies while the same intent is still uploading.
    fn record_progress(&self, claim: &Claim, loaded: u64, total: Option<u64>) {
        let snapshot = {
            let mut state = self.lock_state();
            match state.claimed_mut(claim) {
                Some(tracked) if tracked.intent.status == UploadStatus::Uploading => {
                    tracked.progress = Some(UploadProgress { loaded, total });
                }
                _ => return,
            }
            state.snapshot()
        };
        self.bridge.publish(snapshot);
    }

    /// One scheduling pass. Returns when the loop should wake up on its own,
    /// or `None` when only a kick can produce more work.
    async fn run_pass(self: &Arc<Self>) -> Option<Instant> {
        if !self.is_online() {
            tracing::trace!("Offline, deferring uploads");
            return Some(Instant::now() + self.config.offline_poll_interval());
        }

        if let Some((claim, request)) = self.apply(|state, now| state.claim_next(now)).await {
            tokio::spawn(self.clone().transfer(claim, request));
            return None;
        }

        let state = self.lock_state();
        if state.active.is_some() {
            return None;
        }
        let now = Utc::now();
        state.next_wake(now).map(|at| {
            let delay = (at - now).to_std().unwrap_or(Duration::ZERO);
            Instant::now() + delay
        })
    }

    async fn transfer(self: Arc<Self>, claim: Claim, request: UploadRequest) {
        let progress: ProgressReporter = {
            let inner = Arc::downgrade(&self);
            let claim = claim.clone();
            Arc::new(move |loaded, total| {
                if let Some(inner) = inner.upgrade() {
                    inner.record_progress(&claim, loaded, total);
                }
            })
        };

        tracing::info!(
            capture_id = %claim.capture_id,
            size_bytes = request.payload.len(),
            "Upload started"
        );
        let started = std::time::Instant::now();

        let outcome = AssertUnwindSafe(self.uploader.upload(request, progress))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!(capture_id = %claim.capture_id, "Uploader panicked");
                Err(TransferError::Internal("uploader panicked".to_string()))
            });

        match outcome {
            Ok(_) => self.finish_success(&claim, started.elapsed()).await,
            Err(e) => self.finish_failure(&claim, e).await,
        }

        self.kick.notify_one();
    }

    async fn finish_success(&self, claim: &Claim, elapsed: Duration) {
        let delivered = self
            .apply(|state, _| {
                state.release(claim);
                if state.claimed_mut(claim).is_none() {
                    return (false, Persist::Nothing);
                }
                state.records.remove(&claim.capture_id);
                (true, Persist::Delete(claim.capture_id.clone()))
            })
            .await;

        if delivered {
            tracing::info!(
                capture_id = %claim.capture_id,
                duration_ms = elapsed.as_millis() as u64,
                "Upload completed"
            );
            self.events.publish(CaptureEvent::Uploaded {
                capture_id: claim.capture_id.clone(),
            });
        } else {
            tracing::debug!(
                capture_id = %claim.capture_id,
                "Upload completed for an intent removed mid-transfer"
            );
        }
    }

    async fn finish_failure(&self, claim: &Claim, error: TransferError) {
        let sample = jitter_sample();
        let plan = self
            .apply(|state, now| {
                state.release(claim);
                let Some(tracked) = state.claimed_mut(claim) else {
                    return (None, Persist::Nothing);
                };

                let plan = plan_failure(tracked.intent.attempt_count, &error, &self.config, sample);
                let intent = &mut tracked.intent;
                tracked.progress = None;
                intent.updated_at = now;
                intent.last_error = Some(error.to_last_error());
                match plan {
                    FailurePlan::Retry {
                        attempt_count,
                        delay_ms,
                    } => {
                        intent.status = UploadStatus::Pending;
                        intent.attempt_count = attempt_count;
                        intent.next_attempt_at =
                            Some(now + chrono::Duration::milliseconds(delay_ms as i64));
                    }
                    FailurePlan::Park { attempt_count } => {
                        intent.status = UploadStatus::Failed;
                        intent.attempt_count = attempt_count;
                        intent.next_attempt_at = None;
                    }
                }
                (Some(plan), Persist::Put(intent.clone()))
            })
            .await;

        match plan {
            Some(FailurePlan::Retry {
                attempt_count,
                delay_ms,
            }) => tracing::warn!(
                capture_id = %claim.capture_id,
                error = %error,
                attempt_count,
                delay_ms,
                "Upload failed, retry scheduled"
            ),
            Some(FailurePlan::Park { attempt_count }) => tracing::error!(
                capture_id = %claim.capture_id,
                error = %error,
                attempt_count,
                retryable = error.is_retryable(),
                "Upload failed, intent parked"
            ),
            None => tracing::debug!(
                capture_id = %claim.capture_id,
                error = %error,
                "Upload failed for an intent removed mid-transfer"
            ),
        }
    }
}

/// Handle to the upload queue. Clones share the same engine.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<Inner>,
    shutdown_tx: mpsc::Sender<()>,
}

impl UploadQueue {
    /// Recover persisted intents and start the scheduling loop.
    ///
    /// Records left `uploading` by an interrupted run are downgraded to
    /// `pending` (attempt count kept) and written back. A store that cannot be
    /// listed leaves the queue empty and degraded, not failed.
    pub async fn start(
        store: Arc<dyn DurableStore>,
        uploader: Arc<dyn Uploader>,
        events: EventBus,
        config: QueueConfig,
        connectivity: watch::Receiver<bool>,
    ) -> Self {
        let mut state = QueueState::default();
        let mut downgraded = Vec::new();

        match store.list().await {
            Ok(intents) => {
                let now = Utc::now();
                for mut intent in intents {
                    if intent.status == UploadStatus::Uploading {
                        intent.status = UploadStatus::Pending;
                        intent.updated_at = now;
                        downgraded.push(intent.clone());
                    }
                    state.track(intent, true);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not load persisted upload intents");
                state.persistence_error = Some(e.to_string());
            }
        }

        for intent in &downgraded {
            let result = store.put(intent).await;
            if let Err(e) = &result {
                tracing::warn!(
                    capture_id = %intent.capture_id,
                    error = %e,
                    "Could not persist recovered intent"
                );
            }
            state.record_put(&intent.capture_id, &result);
        }

        tracing::info!(
            recovered = state.records.len(),
            downgraded = downgraded.len(),
            backend = %store.backend_type(),
            "Upload queue initialized"
        );

        let initial = state.snapshot();
        let bridge = SnapshotBridge::new();
        bridge.publish(initial);

        let inner = Arc::new(Inner {
            store,
            uploader,
            events,
            config,
            state: Mutex::new(state),
            store_gate: tokio::sync::Mutex::new(()),
            bridge,
            kick: Notify::new(),
            online: connectivity.clone(),
            closed: CancellationToken::new(),
        });

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(Self::pump(inner.clone(), connectivity, shutdown_rx));

        Self { inner, shutdown_tx }
    }

    async fn pump(
        inner: Arc<Inner>,
        mut connectivity: watch::Receiver<bool>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!(
            max_attempts = inner.config.max_attempts,
            initial_backoff_ms = inner.config.initial_backoff_ms,
            max_backoff_ms = inner.config.max_backoff_ms,
            "Upload queue scheduler started"
        );
        let mut connectivity_open = true;

        loop {
            let wake = inner.run_pass().await;
            // Parked far ahead when idle; the branch is disabled anyway.
            let deadline = wake.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Upload queue scheduler shutting down");
                    break;
                }
                _ = inner.kick.notified() => {}
                _ = tokio::time::sleep_until(deadline), if wake.is_some() => {}
                changed = connectivity.changed(), if connectivity_open => {
                    match changed {
                        Ok(()) => {
                            let online = *connectivity.borrow_and_update();
                            tracing::debug!(online, "Scheduler observed connectivity change");
                        }
                        Err(_) => connectivity_open = false,
                    }
                }
            }
        }
    }

    /// Track a new intent and persist it. Idempotent per capture id.
    ///
    /// A capture id the store can never hold is rejected with
    /// [`QueueError::InvalidIntent`]. Any other store failure still tracks the
    /// intent and reports [`EnqueueOutcome::EnqueuedInMemory`].
    #[tracing::instrument(skip(self, new), fields(capture_id = %new.capture_id, size_bytes = new.payload.len()))]
    pub async fn enqueue(&self, new: NewIntent) -> Result<EnqueueOutcome, QueueError> {
        if self.inner.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }
        if new.capture_id.trim().is_empty() {
            return Err(QueueError::InvalidIntent(
                "capture id must not be empty".to_string(),
            ));
        }

        let (outcome, written) = self
            .inner
            .apply_tracked(|state, now| {
                if state.records.contains_key(&new.capture_id) {
                    return (EnqueueOutcome::AlreadyTracked, Persist::Nothing);
                }
                let intent = UploadIntent::new(new, now);
                state.track(intent.clone(), false);
                (EnqueueOutcome::Enqueued, Persist::Put(intent))
            })
            .await;

        let outcome = match (outcome, written) {
            (EnqueueOutcome::Enqueued, Written::Rejected(reason)) => {
                return Err(QueueError::InvalidIntent(reason));
            }
            (EnqueueOutcome::Enqueued, Written::Failed) => EnqueueOutcome::EnqueuedInMemory,
            (outcome, _) => outcome,
        };

        match outcome {
            EnqueueOutcome::Enqueued => tracing::info!("Upload intent enqueued"),
            EnqueueOutcome::EnqueuedInMemory => {
                tracing::warn!("Upload intent enqueued in memory only")
            }
            EnqueueOutcome::AlreadyTracked => tracing::debug!("Upload intent already tracked"),
        }
        if outcome != EnqueueOutcome::AlreadyTracked {
            self.kick();
        }
        Ok(outcome)
    }

    /// Reset an intent to an immediate, fresh attempt.
    ///
    /// Returns `false` when the capture id is not tracked. An intent that is
    /// uploading right now is left alone.
    pub async fn retry_now(&self, capture_id: &str) -> bool {
        let (tracked, changed) = self
            .inner
            .apply(|state, now| {
                let Some(tracked) = state.records.get_mut(capture_id) else {
                    return ((false, false), Persist::Nothing);
                };
                if tracked.intent.status == UploadStatus::Uploading {
                    return ((true, false), Persist::Nothing);
                }
                let intent = &mut tracked.intent;
                intent.status = UploadStatus::Pending;
                intent.attempt_count = 0;
                intent.next_attempt_at = None;
                intent.updated_at = now;
                ((true, true), Persist::Put(intent.clone()))
            })
            .await;

        if changed {
            tracing::info!(capture_id, "Manual retry requested");
            self.kick();
        }
        tracked
    }

    /// Stop tracking an intent and delete its record. A transfer already in
    /// flight for it finishes in the background and its outcome is discarded.
    pub async fn remove(&self, capture_id: &str) -> bool {
        let removed = self
            .inner
            .apply(|state, _| match state.records.remove(capture_id) {
                Some(_) => (true, Persist::Delete(capture_id.to_string())),
                None => (false, Persist::Nothing),
            })
            .await;

        if removed {
            tracing::info!(capture_id, "Upload intent removed");
            self.kick();
        }
        removed
    }

    /// Request a scheduling pass.
    pub fn kick(&self) {
        self.inner.kick.notify_one();
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.inner.bridge.current()
    }

    /// Register a snapshot listener; it receives the current snapshot right away.
    pub fn subscribe(
        &self,
        listener: impl Fn(&QueueSnapshot) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.bridge.subscribe(listener)
    }

    pub fn watch(&self) -> watch::Receiver<QueueSnapshot> {
        self.inner.bridge.watch()
    }

    /// Wait until a snapshot satisfies `predicate` and return it.
    ///
    /// Fails with [`QueueError::Closed`] once the queue is shut down and the
    /// current snapshot does not match.
    pub async fn wait_for(
        &self,
        predicate: impl Fn(&QueueSnapshot) -> bool,
    ) -> Result<QueueSnapshot, QueueError> {
        let mut rx = self.watch();
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if predicate(&*snapshot) {
                    return Ok(snapshot.clone());
                }
            }
            tokio::select! {
                changed = rx.changed() => changed.map_err(|_| QueueError::Closed)?,
                _ = self.inner.closed.cancelled() => return Err(QueueError::Closed),
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    pub async fn shutdown(&self) {
        tracing::info!("Initiating upload queue shutdown");
        self.inner.closed.cancel();
        let _ = self.shutdown_tx.send(()).await;
    }
}
