use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Pod;
use stevedore_core::PodKey;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::queue::{DelayQueue, EventKind, HistoricalStore, QueuePolicy, QueuedPod};

/// How long a single store pop may block before checking the delta signal
const ENQUEUE_POP_TIMEOUT: Duration = Duration::from_millis(200);
/// How long to wait for a delta signal before polling the store again
const ENQUEUE_WAIT_TIMEOUT: Duration = Duration::from_secs(3);
/// How long a single queue pop may block before checking the unscheduled signal
const YIELD_POP_TIMEOUT: Duration = Duration::from_millis(200);
/// How long to wait for an unscheduled signal before polling the queue again
const YIELD_WAIT_TIMEOUT: Duration = Duration::from_secs(3);

/// Couples the historical store to the delay queue.
///
/// One loop drains pod updates from the store into the queue; `yield_pod`
/// hands queued pods to the scheduling path, skipping any that transitioned
/// or got bound in the meantime. Both sides use short pops with a longer
/// signalled wait so neither can block the other for long.
pub struct Queuer {
    store: Arc<HistoricalStore>,
    queue: Arc<DelayQueue>,
    /// Pod changes are available for processing
    delta: Notify,
    /// There are unscheduled pods for processing
    unscheduled: Notify,
}

impl Queuer {
    pub fn new(store: Arc<HistoricalStore>, queue: Arc<DelayQueue>) -> Self {
        Self {
            store,
            queue,
            delta: Notify::new(),
            unscheduled: Notify::new(),
        }
    }

    /// Signal that there are probably pod updates waiting to be processed
    pub fn updates_available(&self) {
        self.delta.notify_one();
    }

    /// Delete a pod from the to-be-scheduled queue
    pub fn dequeue(&self, key: &PodKey) {
        self.queue.delete(key);
    }

    /// Re-add a pod to the to-be-scheduled queue. Keeps existing queued data
    /// so a newer entry is never overwritten with stale state.
    pub fn requeue(&self, pod: QueuedPod) {
        self.queue.add(pod, QueuePolicy::KeepExisting);
        self.unscheduled.notify_one();
    }

    /// Watch for pod updates and queue unscheduled pods for scheduling
    pub async fn run(&self, token: CancellationToken) {
        info!("Watching for newly created pods");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    return;
                }
                _ = self.enqueue_step() => {}
            }
        }
    }

    async fn enqueue_step(&self) {
        let Some((key, pod)) = self.store.await_pod(ENQUEUE_POP_TIMEOUT).await else {
            // Nothing pending; wait for a delta signal, bounded so that
            // scheduling proceeds even without recent pod changes
            let _ =
                tokio::time::timeout(ENQUEUE_WAIT_TIMEOUT, self.delta.notified()).await;
            return;
        };

        if pod_host(&pod).is_some() {
            self.queue.delete(&key);
        } else {
            // Always push the latest observed state
            let queued = QueuedPod::new(key.clone(), pod).with_deadline(Instant::now());
            self.queue.offer(queued, QueuePolicy::ReplaceExisting);
            self.unscheduled.notify_one();
            debug!(pod = %key, "Queued pod for scheduling");
        }
    }

    /// Pop the next pod for the scheduling path
    pub async fn yield_pod(&self) -> Pod {
        debug!("Attempting to yield a pod");
        loop {
            let Some(queued) = self.queue.await_pod(YIELD_POP_TIMEOUT).await else {
                let _ =
                    tokio::time::timeout(YIELD_WAIT_TIMEOUT, self.unscheduled.notified()).await;
                continue;
            };

            if queued.pod.metadata.name.is_none() {
                warn!("Yield popped a malformed pod, skipping");
            } else if !self.store.poll(&queued.key, EventKind::Pop) {
                debug!(pod = %queued.key, "Yield popped a transitioning pod, skipping");
            } else if pod_host(&queued.pod).is_some() {
                // Should never happen if the enqueue side filters properly
                warn!(pod = %queued.key, "Yield popped an already-scheduled pod, skipping");
            } else {
                return queued.pod;
            }
        }
    }
}

/// The host a pod has been bound to, if any. Scheduler-local writes of this
/// field cache the binding; the control-plane POST is authoritative.
pub fn pod_host(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .filter(|h| !h.is_empty())
}
