use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures_util::future;
use k8s_openapi::api::core::v1::Pod;
use stevedore_core::PodKey;
use tokio::sync::Notify;

use crate::offers::BreakSignal;

/// What to do when a pod with the same key is already queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Overwrite the queued entry; used when pushing the latest observed state
    ReplaceExisting,
    /// Keep the queued entry; used on requeue so newer data is not clobbered
    KeepExisting,
}

/// A pod waiting for scheduling, ordered by deadline.
///
/// `notify` is an optional break-out signal: when it fires, the pod becomes
/// immediately eligible regardless of its deadline.
#[derive(Clone)]
pub struct QueuedPod {
    pub key: PodKey,
    pub pod: Pod,
    pub deadline: Option<Instant>,
    pub delay: Option<Duration>,
    pub notify: Option<BreakSignal>,
}

impl QueuedPod {
    pub fn new(key: PodKey, pod: Pod) -> Self {
        Self {
            key,
            pod,
            deadline: None,
            delay: None,
            notify: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_notify(mut self, signal: BreakSignal) -> Self {
        self.notify = Some(signal);
        self
    }
}

struct QueueEntry {
    pod: QueuedPod,
    deadline: Instant,
}

impl QueueEntry {
    fn is_ready(&self, now: Instant) -> bool {
        self.deadline <= now
            || self
                .pod
                .notify
                .as_ref()
                .is_some_and(|signal| signal.is_triggered())
    }
}

/// Time-delayed priority queue of pods awaiting scheduling.
///
/// `await_pod` blocks until the earliest deadline has passed, a fresher item
/// arrives, or a queued pod's break-out signal fires; it returns None on
/// timeout and callers are expected to loop.
#[derive(Default)]
pub struct DelayQueue {
    inner: Mutex<HashMap<PodKey, QueueEntry>>,
    changed: Notify,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a pod at its own deadline (now, if it carries none)
    pub fn offer(&self, pod: QueuedPod, policy: QueuePolicy) {
        let deadline = pod.deadline.unwrap_or_else(Instant::now);
        self.insert(pod, deadline, policy);
    }

    /// Queue a pod after its delay (immediately, if it carries none)
    pub fn add(&self, pod: QueuedPod, policy: QueuePolicy) {
        let deadline = Instant::now() + pod.delay.unwrap_or_default();
        self.insert(pod, deadline, policy);
    }

    fn insert(&self, pod: QueuedPod, deadline: Instant, policy: QueuePolicy) {
        let mut inner = self.inner.lock().unwrap();
        match policy {
            QueuePolicy::KeepExisting if inner.contains_key(&pod.key) => {}
            _ => {
                inner.insert(pod.key.clone(), QueueEntry { pod, deadline });
            }
        }
        drop(inner);
        self.changed.notify_one();
    }

    /// Remove a queued pod by key
    pub fn delete(&self, key: &PodKey) {
        self.inner.lock().unwrap().remove(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pop the next ready pod, waiting at most `timeout`
    pub async fn await_pod(&self, timeout: Duration) -> Option<QueuedPod> {
        let give_up = Instant::now() + timeout;

        loop {
            let (next_deadline, signals) = {
                let mut inner = self.inner.lock().unwrap();
                let now = Instant::now();

                // Earliest-deadline entry that is ready right now
                let ready = inner
                    .values()
                    .filter(|e| e.is_ready(now))
                    .min_by_key(|e| e.deadline)
                    .map(|e| e.pod.key.clone());
                if let Some(key) = ready {
                    return inner.remove(&key).map(|e| e.pod);
                }

                let next_deadline = inner.values().map(|e| e.deadline).min();
                let signals: Vec<BreakSignal> = inner
                    .values()
                    .filter_map(|e| e.pod.notify.clone())
                    .collect();
                (next_deadline, signals)
            };

            let now = Instant::now();
            if now >= give_up {
                return None;
            }

            let wake_at = next_deadline.map_or(give_up, |d| d.min(give_up));
            let sleep = tokio::time::sleep(wake_at.saturating_duration_since(now));

            // Wake on deadline/timeout, on queue mutation, or on any queued
            // pod's break-out signal
            let breakout = async {
                if signals.is_empty() {
                    future::pending::<()>().await;
                } else {
                    let waits = signals.iter().map(|s| Box::pin(s.wait()));
                    future::select_all(waits).await;
                }
            };

            tokio::select! {
                _ = sleep => {}
                _ = self.changed.notified() => {}
                _ = breakout => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(ns: &str, name: &str) -> QueuedPod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some(ns.to_string());
        QueuedPod::new(PodKey::new(ns, name), pod)
    }

    #[tokio::test]
    async fn test_immediate_pod_pops() {
        let queue = DelayQueue::new();
        queue.offer(queued("default", "foo"), QueuePolicy::ReplaceExisting);

        let pod = queue.await_pod(Duration::from_millis(100)).await;
        assert_eq!(pod.unwrap().key, PodKey::new("default", "foo"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_await_times_out_empty() {
        let queue = DelayQueue::new();
        let pod = queue.await_pod(Duration::from_millis(20)).await;
        assert!(pod.is_none());
    }

    #[tokio::test]
    async fn test_delayed_pod_waits_for_deadline() {
        let queue = DelayQueue::new();
        queue.add(
            queued("default", "foo").with_delay(Duration::from_millis(50)),
            QueuePolicy::ReplaceExisting,
        );

        // Not ready yet
        assert!(queue.await_pod(Duration::from_millis(10)).await.is_none());
        // Ready after the delay elapses
        assert!(queue.await_pod(Duration::from_millis(200)).await.is_some());
    }

    #[tokio::test]
    async fn test_deadline_ordering() {
        let queue = DelayQueue::new();
        let now = Instant::now();
        queue.offer(
            queued("default", "late").with_deadline(now + Duration::from_millis(20)),
            QueuePolicy::ReplaceExisting,
        );
        queue.offer(
            queued("default", "early").with_deadline(now),
            QueuePolicy::ReplaceExisting,
        );

        let first = queue.await_pod(Duration::from_millis(200)).await.unwrap();
        assert_eq!(first.key.name, "early");
        let second = queue.await_pod(Duration::from_millis(200)).await.unwrap();
        assert_eq!(second.key.name, "late");
    }

    #[tokio::test]
    async fn test_break_signal_short_circuits_delay() {
        let queue = DelayQueue::new();
        let signal = BreakSignal::new();
        queue.add(
            queued("default", "foo")
                .with_delay(Duration::from_secs(60))
                .with_notify(signal.clone()),
            QueuePolicy::ReplaceExisting,
        );

        signal.trigger();
        let pod = queue.await_pod(Duration::from_millis(200)).await;
        assert!(pod.is_some(), "break signal must bypass the 60s delay");
    }

    #[tokio::test]
    async fn test_keep_existing_policy() {
        let queue = DelayQueue::new();
        let mut original = queued("default", "foo");
        original.pod.metadata.labels =
            Some([("v".to_string(), "1".to_string())].into_iter().collect());
        queue.offer(original, QueuePolicy::ReplaceExisting);

        queue.add(queued("default", "foo"), QueuePolicy::KeepExisting);

        let pod = queue.await_pod(Duration::from_millis(100)).await.unwrap();
        assert!(pod.pod.metadata.labels.is_some(), "existing entry kept");
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        let queue = DelayQueue::new();
        queue.offer(queued("default", "foo"), QueuePolicy::ReplaceExisting);
        queue.delete(&PodKey::new("default", "foo"));
        assert!(queue.await_pod(Duration::from_millis(20)).await.is_none());
    }
}
