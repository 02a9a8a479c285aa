use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use stevedore_core::PodKey;
use tracing::{debug, error, info};

use crate::backoff::PodBackoff;
use crate::error::SchedulerError;
use crate::framework::{FrameworkScheduler, SchedulerOps};
use crate::queue::QueuedPod;
use crate::queuer::Queuer;
use crate::task::PodTaskState;

/// Requeues failed scheduling attempts with exponential backoff.
///
/// When no offer matched, an offer-arrival listener is registered whose break
/// signal lets the requeued pod skip the rest of its backoff delay.
pub struct ErrorHandler {
    scheduler: Arc<FrameworkScheduler>,
    backoff: PodBackoff,
    queuer: Arc<Queuer>,
}

impl ErrorHandler {
    pub fn new(scheduler: Arc<FrameworkScheduler>, queuer: Arc<Queuer>) -> Self {
        Self {
            scheduler,
            backoff: PodBackoff::default(),
            queuer,
        }
    }

    pub async fn handle(&self, pod: &Pod, scheduling_err: &SchedulerError) {
        if matches!(scheduling_err, SchedulerError::NoSuchPod) {
            debug!("Not rescheduling non-existent pod");
            return;
        }

        let Ok(key) = PodKey::from_pod(pod) else {
            error!("Failed to construct pod key, aborting reschedule");
            return;
        };
        info!(pod = %key, error = %scheduling_err, "Error scheduling pod; retrying");

        self.backoff.gc();

        let state = self.scheduler.state.read().await;

        let Some(task_id) = state.task_for_pod(&key) else {
            // No mapping any more: someone deleted the pod
            debug!(pod = %key, "Could not resolve pod to task, aborting reschedule");
            return;
        };

        let Some(task) = state.get_task(&task_id) else {
            debug!(pod = %key, "Task is gone, aborting reschedule");
            return;
        };
        if task.state != PodTaskState::Pending {
            debug!(pod = %key, "Task is no longer pending, aborting reschedule");
            return;
        }
        if task.launched {
            debug!(pod = %key, "Skipping reschedule for already-launched pod");
            return;
        }

        let mut queued = QueuedPod::new(key.clone(), pod.clone());

        if matches!(scheduling_err, SchedulerError::NoSuitableOffers { .. }) {
            debug!(pod = %key, "Adding backoff breakout handler");
            let shared_state = Arc::clone(&self.scheduler.state);
            let listener_task_id = task_id.clone();
            let signal = self.scheduler.offers.listen(
                key.clone(),
                Box::new(move |offer| {
                    // Fired from the registry's add path; a contended lock
                    // counts as no match and the listener stays armed
                    match shared_state.try_read() {
                        Ok(state) => state
                            .get_task(&listener_task_id)
                            .map(|t| {
                                t.state == PodTaskState::Pending
                                    && !t.launched
                                    && t.accepts(offer)
                            })
                            .unwrap_or(false),
                        Err(_) => false,
                    }
                }),
            );
            queued = queued.with_notify(signal);
        }

        drop(state);

        let delay = self.backoff.get_backoff(&key);
        debug!(pod = %key, delay = ?delay, "Requeueing pod with backoff");
        self.queuer.requeue(queued.with_delay(delay));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::test_support::RecordingDriver;
    use crate::offers::OfferRegistryConfig;
    use crate::queue::{DelayQueue, HistoricalStore};
    use crate::task::PodTask;
    use std::time::Duration;
    use stevedore_core::{ExecutorId, Offer, OfferId, ResourceBundle, SlaveId};

    fn pod(name: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod.spec = Some(Default::default());
        pod
    }

    struct Fixture {
        scheduler: Arc<FrameworkScheduler>,
        queue: Arc<DelayQueue>,
        handler: ErrorHandler,
    }

    fn fixture() -> Fixture {
        let driver = Arc::new(RecordingDriver::default());
        let scheduler = Arc::new(FrameworkScheduler::new(
            driver,
            ExecutorId::new("exec"),
            OfferRegistryConfig::default(),
        ));
        let (store, _rx) = HistoricalStore::new();
        let queue = Arc::new(DelayQueue::new());
        let queuer = Arc::new(Queuer::new(Arc::new(store), queue.clone()));
        let handler = ErrorHandler::new(scheduler.clone(), queuer);
        Fixture {
            scheduler,
            queue,
            handler,
        }
    }

    #[tokio::test]
    async fn test_no_such_pod_dropped() {
        let f = fixture();
        f.handler.handle(&pod("foo"), &SchedulerError::NoSuchPod).await;
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn test_unmapped_pod_dropped() {
        let f = fixture();
        f.handler
            .handle(&pod("foo"), &SchedulerError::no_suitable_offers("default/foo"))
            .await;
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn test_pending_pod_requeued_with_backoff() {
        let f = fixture();
        let p = pod("foo");
        let task = PodTask::new(p.clone(), ExecutorId::new("exec")).unwrap();
        f.scheduler.state.write().await.register_task(task);

        f.handler
            .handle(&p, &SchedulerError::no_suitable_offers("default/foo"))
            .await;

        assert_eq!(f.queue.len(), 1);
        // First backoff is 1s; the pod must not be ready immediately
        assert!(f.queue.await_pod(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_offer_arrival_wakes_requeued_pod() {
        let f = fixture();
        let p = pod("foo");
        let task = PodTask::new(p.clone(), ExecutorId::new("exec")).unwrap();
        f.scheduler.state.write().await.register_task(task);

        f.handler
            .handle(&p, &SchedulerError::no_suitable_offers("default/foo"))
            .await;

        // A matching offer arrives; the listener fires and the queued pod
        // becomes eligible well before its backoff deadline
        f.scheduler
            .resource_offers(vec![Offer {
                id: OfferId::new("o1"),
                slave_id: SlaveId::new("s1"),
                hostname: "s1.example.com".to_string(),
                resources: ResourceBundle::new(4.0, 4096.0),
            }])
            .await;

        let queued = f.queue.await_pod(Duration::from_millis(200)).await;
        assert!(queued.is_some(), "break signal must cut the backoff short");
    }

    #[tokio::test]
    async fn test_launched_pod_not_requeued() {
        let f = fixture();
        let p = pod("foo");
        let task = PodTask::new(p.clone(), ExecutorId::new("exec")).unwrap();
        let task_id = f.scheduler.state.write().await.register_task(task);
        f.scheduler
            .state
            .write()
            .await
            .get_task_mut(&task_id)
            .unwrap()
            .launched = true;

        f.handler
            .handle(&p, &SchedulerError::no_suitable_offers("default/foo"))
            .await;
        assert!(f.queue.is_empty());
    }
}
