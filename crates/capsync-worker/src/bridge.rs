//! Snapshot fan-out from the queue engine to UI-facing listeners.
//!
//! Every listener sees snapshots in strictly increasing revision order. A
//! snapshot older than the last one a listener received is skipped for that
//! listener, so a slow publisher can never overwrite a newer state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use capsync_core::QueueSnapshot;
use tokio::sync::watch;

type Listener = dyn Fn(&QueueSnapshot) + Send + Sync;

struct ListenerSlot {
    id: u64,
    delivered_revision: Mutex<u64>,
    callback: Box<Listener>,
}

impl ListenerSlot {
    fn deliver(&self, snapshot: &QueueSnapshot) {
        let mut delivered = lock(&self.delivered_revision);
        if snapshot.revision <= *delivered {
            return;
        }
        *delivered = snapshot.revision;
        (self.callback)(snapshot);
    }
}

pub struct SnapshotBridge {
    listeners: Mutex<Vec<Arc<ListenerSlot>>>,
    next_listener_id: AtomicU64,
    current: watch::Sender<QueueSnapshot>,
}

impl SnapshotBridge {
    pub fn new() -> Arc<Self> {
        let (current, _) = watch::channel(QueueSnapshot::default());
        Arc::new(Self {
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            current,
        })
    }

    /// Offer a snapshot. Stale revisions are dropped.
    pub fn publish(&self, snapshot: QueueSnapshot) {
        let accepted = self.current.send_if_modified(|current| {
            if snapshot.revision > current.revision {
                current.clone_from(&snapshot);
                true
            } else {
                false
            }
        });
        if !accepted {
            tracing::trace!(revision = snapshot.revision, "Dropping stale snapshot");
            return;
        }

        // Listeners run outside the registry lock so they may (un)subscribe.
        let listeners: Vec<Arc<ListenerSlot>> = lock(&self.listeners).clone();
        for slot in listeners {
            slot.deliver(&snapshot);
        }
    }

    /// Register a listener; it is invoked immediately with the current snapshot.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&QueueSnapshot) + Send + Sync + 'static,
    ) -> Subscription {
        let slot = Arc::new(ListenerSlot {
            id: self.next_listener_id.fetch_add(1, Ordering::Relaxed),
            delivered_revision: Mutex::new(0),
            callback: Box::new(listener),
        });
        lock(&self.listeners).push(slot.clone());

        let current = self.current();
        if current.revision > 0 {
            slot.deliver(&current);
        }

        Subscription {
            bridge: Arc::downgrade(self),
            id: Some(slot.id),
        }
    }

    pub fn current(&self) -> QueueSnapshot {
        self.current.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<QueueSnapshot> {
        self.current.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    fn unsubscribe(&self, id: u64) {
        lock(&self.listeners).retain(|slot| slot.id != id);
    }
}

/// Handle returned by [`SnapshotBridge::subscribe`]. Dropping it detaches the listener.
#[must_use = "dropping a Subscription detaches its listener"]
pub struct Subscription {
    bridge: Weak<SnapshotBridge>,
    id: Option<u64>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let (Some(id), Some(bridge)) = (self.id.take(), self.bridge.upgrade()) {
            bridge.unsubscribe(id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
