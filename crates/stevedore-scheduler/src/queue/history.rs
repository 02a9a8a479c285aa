use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Pod;
use stevedore_core::PodKey;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::warn;

/// Observable event kinds recorded by the historical store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Add,
    Update,
    Pop,
    Delete,
}

/// A mutation delivered, in order, to the store's update channel
#[derive(Clone)]
pub struct StoreEntry {
    pub key: PodKey,
    pub pod: Pod,
    pub kind: EventKind,
}

#[derive(Default)]
struct StoreInner {
    items: HashMap<PodKey, Pod>,
    queue: VecDeque<PodKey>,
    /// Latest unconsumed event per key, answered by `poll`
    pending: HashMap<PodKey, EventKind>,
}

/// Pod-update cache fed by the control-plane watch.
///
/// A FIFO over pod keys with an event history: every mutation is delivered in
/// order on the update channel, and the latest unconsumed event per key can be
/// polled (and consumed) atomically. Re-adding a key after a delete starts a
/// new history.
pub struct HistoricalStore {
    inner: Mutex<StoreInner>,
    changed: Notify,
    updates: UnboundedSender<StoreEntry>,
}

impl HistoricalStore {
    /// Create a store and the receiving end of its update channel
    pub fn new() -> (Self, UnboundedReceiver<StoreEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Mutex::new(StoreInner::default()),
                changed: Notify::new(),
                updates: tx,
            },
            rx,
        )
    }

    fn record(&self, inner: &mut StoreInner, key: PodKey, pod: Pod, kind: EventKind) {
        inner.pending.insert(key.clone(), kind);
        if self.updates.send(StoreEntry { key, pod, kind }).is_err() {
            warn!("Store update channel closed; dropping event");
        }
    }

    /// Record a newly observed pod
    pub fn add(&self, key: PodKey, pod: Pod) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.queue.contains(&key) {
            inner.queue.push_back(key.clone());
        }
        inner.items.insert(key.clone(), pod.clone());
        self.record(&mut inner, key, pod, EventKind::Add);
        drop(inner);
        self.changed.notify_one();
    }

    /// Record an update to a known pod
    pub fn update(&self, key: PodKey, pod: Pod) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.queue.contains(&key) {
            inner.queue.push_back(key.clone());
        }
        inner.items.insert(key.clone(), pod.clone());
        self.record(&mut inner, key, pod, EventKind::Update);
        drop(inner);
        self.changed.notify_one();
    }

    /// Record a deletion; the final pod object travels with the event
    pub fn delete(&self, key: PodKey, pod: Pod) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.remove(&key);
        inner.queue.retain(|k| k != &key);
        self.record(&mut inner, key, pod, EventKind::Delete);
        drop(inner);
        self.changed.notify_one();
    }

    /// Replace the entire contents, e.g. after a relist. Pending histories of
    /// keys absent from the new set are dropped.
    pub fn replace(&self, pods: Vec<(PodKey, Pod)>) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.clear();
        inner.queue.clear();
        inner.pending.clear();
        for (key, pod) in pods {
            inner.queue.push_back(key.clone());
            inner.items.insert(key.clone(), pod.clone());
            self.record(&mut inner, key, pod, EventKind::Add);
        }
        drop(inner);
        self.changed.notify_one();
    }

    /// Consume the pending event for `key` iff it matches `kind`
    pub fn poll(&self, key: &PodKey, kind: EventKind) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.pending.get(key) == Some(&kind) {
            inner.pending.remove(key);
            true
        } else {
            false
        }
    }

    /// Pop the head of the FIFO, waiting at most `timeout`; records a POP
    /// event for the returned key
    pub async fn await_pod(&self, timeout: Duration) -> Option<(PodKey, Pod)> {
        let give_up = Instant::now() + timeout;

        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                while let Some(key) = inner.queue.pop_front() {
                    if let Some(pod) = inner.items.remove(&key) {
                        self.record(&mut inner, key.clone(), pod.clone(), EventKind::Pop);
                        return Some((key, pod));
                    }
                    // Item was deleted while queued; skip the stale key
                }
            }

            let now = Instant::now();
            if now >= give_up {
                return None;
            }

            tokio::select! {
                _ = tokio::time::sleep(give_up - now) => {}
                _ = self.changed.notified() => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
