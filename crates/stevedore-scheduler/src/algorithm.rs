use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use stevedore_core::{PodKey, TaskId};
use tracing::{debug, info, warn};

use crate::error::{Result, SchedulerError};
use crate::framework::{FrameworkScheduler, SchedulerOps};
use crate::queue::{EventKind, HistoricalStore};
use crate::task::{PodTask, PodTaskState};

/// Selects a slave offer for a pod under the scheduler lock.
///
/// Never retries: a failure is surfaced to the error handler, which owns
/// requeueing and backoff.
pub struct Algorithm {
    scheduler: Arc<FrameworkScheduler>,
    store: Arc<HistoricalStore>,
}

impl Algorithm {
    pub fn new(scheduler: Arc<FrameworkScheduler>, store: Arc<HistoricalStore>) -> Self {
        Self { scheduler, store }
    }

    /// Choose a hostname for the pod, registering a task for it if this is
    /// the first attempt.
    pub async fn schedule(&self, pod: &Pod) -> Result<String> {
        let Ok(key) = PodKey::from_pod(pod) else {
            warn!("Aborting schedule, unable to identify pod");
            return Err(SchedulerError::NoSuchPod);
        };
        info!(pod = %key, "Trying to schedule pod");

        let mut state = self.scheduler.state.write().await;

        match state.task_for_pod(&key) {
            None => {
                // The pod may have been deleted between yield and here; the
                // store still holds the pending DELETE if so
                if self.store.poll(&key, EventKind::Delete) {
                    info!(pod = %key, "Aborting schedule, pod has been deleted");
                    return Err(SchedulerError::NoSuchPod);
                }
                let task = PodTask::new(pod.clone(), self.scheduler.executor_id.clone())?;
                let task_id = state.register_task(task);
                self.do_schedule(&mut *state, &task_id)
            }
            Some(task_id) => {
                let task = state
                    .get_task(&task_id)
                    .ok_or_else(|| SchedulerError::internal("task map out of sync"))?;
                match task.state {
                    PodTaskState::Pending if task.launched => {
                        Err(SchedulerError::AlreadyLaunched { task_id })
                    }
                    PodTaskState::Pending => self.do_schedule(&mut *state, &task_id),
                    _ => Err(SchedulerError::NotPending { task_id }),
                }
            }
        }
    }

    /// Run offer matching for a registered pending task; on success the task
    /// holds the offer and the chosen slave's hostname is returned.
    fn do_schedule<S: SchedulerOps>(&self, state: &mut S, task_id: &TaskId) -> Result<String> {
        let (key, demand_check) = {
            let task = state
                .get_task(task_id)
                .ok_or_else(|| SchedulerError::internal("task map out of sync"))?;
            (task.key.clone(), task.demand)
        };

        let offer = self
            .scheduler
            .offers
            .acquire_matching(|offer| offer.resources.satisfies(&demand_check))
            .ok_or_else(|| SchedulerError::no_suitable_offers(key.to_string()))?;

        match state.slave_hostname(&offer.slave_id) {
            None => {
                // Not much sense releasing the offer; its owner is gone
                self.scheduler.offers.invalidate(&offer.id);
                if let Some(task) = state.get_task_mut(task_id) {
                    task.clear_task_info();
                }
                Err(SchedulerError::SlaveDisappeared {
                    slave_id: offer.slave_id.clone(),
                    task_id: task_id.clone(),
                })
            }
            Some(hostname) => {
                let task = state
                    .get_task_mut(task_id)
                    .ok_or_else(|| SchedulerError::internal("task map out of sync"))?;
                task.fill_task_info(&offer);
                debug!(pod = %key, offer = %offer.id, host = %hostname, "Matched offer");
                Ok(hostname)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::test_support::RecordingDriver;
    use crate::framework::Slave;
    use crate::offers::OfferRegistryConfig;
    use stevedore_core::{ExecutorId, Offer, OfferId, ResourceBundle, SlaveId};

    fn fixture() -> (Algorithm, Arc<FrameworkScheduler>, Arc<HistoricalStore>) {
        let driver = Arc::new(RecordingDriver::default());
        let scheduler = Arc::new(FrameworkScheduler::new(
            driver,
            ExecutorId::new("exec"),
            OfferRegistryConfig::default(),
        ));
        let (store, _rx) = HistoricalStore::new();
        let store = Arc::new(store);
        let algorithm = Algorithm::new(scheduler.clone(), store.clone());
        (algorithm, scheduler, store)
    }

    fn pod(name: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod.spec = Some(Default::default());
        pod
    }

    fn offer(id: &str, slave: &str) -> Offer {
        Offer {
            id: OfferId::new(id),
            slave_id: SlaveId::new(slave),
            hostname: format!("{}.example.com", slave),
            resources: ResourceBundle::new(4.0, 4096.0),
        }
    }

    #[tokio::test]
    async fn test_schedule_matches_offer() {
        let (algorithm, scheduler, _store) = fixture();
        scheduler.resource_offers(vec![offer("o1", "s1")]).await;

        let host = algorithm.schedule(&pod("foo")).await.unwrap();
        assert_eq!(host, "s1.example.com");

        let state = scheduler.state.read().await;
        let task_id = state.task_for_pod(&PodKey::new("default", "foo")).unwrap();
        let task = state.get_task(&task_id).unwrap();
        assert!(task.has_accepted_offer());
        assert_eq!(task.offer_id, Some(OfferId::new("o1")));
        assert!(!task.launched);
    }

    #[tokio::test]
    async fn test_schedule_no_offers() {
        let (algorithm, _scheduler, _store) = fixture();
        let err = algorithm.schedule(&pod("foo")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoSuitableOffers { .. }));
    }

    #[tokio::test]
    async fn test_schedule_aborts_on_pending_delete() {
        let (algorithm, scheduler, store) = fixture();
        scheduler.resource_offers(vec![offer("o1", "s1")]).await;

        let p = pod("foo");
        let key = PodKey::new("default", "foo");
        store.add(key.clone(), p.clone());
        store.delete(key.clone(), p.clone());

        let err = algorithm.schedule(&p).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoSuchPod));

        // No task was registered for the deleted pod
        let state = scheduler.state.read().await;
        assert!(state.task_for_pod(&key).is_none());
    }

    #[tokio::test]
    async fn test_schedule_slave_disappeared() {
        let (algorithm, scheduler, _store) = fixture();
        scheduler.resource_offers(vec![offer("o1", "s1")]).await;
        // The slave vanishes but its offer lingers in the registry
        scheduler.state.write().await.slaves.remove(&SlaveId::new("s1"));

        let err = algorithm.schedule(&pod("foo")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::SlaveDisappeared { .. }));

        // The stale offer is gone and the task holds nothing
        assert!(scheduler.offers.get(&OfferId::new("o1")).is_none());
        let state = scheduler.state.read().await;
        let task_id = state.task_for_pod(&PodKey::new("default", "foo")).unwrap();
        assert!(!state.get_task(&task_id).unwrap().has_accepted_offer());
    }

    #[tokio::test]
    async fn test_schedule_rejects_launched_task() {
        let (algorithm, scheduler, _store) = fixture();
        scheduler.resource_offers(vec![offer("o1", "s1")]).await;

        let p = pod("foo");
        algorithm.schedule(&p).await.unwrap();
        {
            let mut state = scheduler.state.write().await;
            let task_id = state.task_for_pod(&PodKey::new("default", "foo")).unwrap();
            state.get_task_mut(&task_id).unwrap().launched = true;
        }

        let err = algorithm.schedule(&p).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyLaunched { .. }));
    }

    #[tokio::test]
    async fn test_schedule_reruns_matching_for_pending_task() {
        let (algorithm, scheduler, _store) = fixture();

        let p = pod("foo");
        // First attempt: nothing to match
        assert!(algorithm.schedule(&p).await.is_err());

        // An offer shows up; the existing pending task gets rematched
        scheduler.resource_offers(vec![offer("o1", "s1")]).await;
        let host = algorithm.schedule(&p).await.unwrap();
        assert_eq!(host, "s1.example.com");
    }

    #[tokio::test]
    async fn test_slave_registered_via_offer_even_when_unmatched() {
        let (_algorithm, scheduler, _store) = fixture();
        scheduler.resource_offers(vec![offer("o1", "s1")]).await;
        let state = scheduler.state.read().await;
        assert!(matches!(
            state.slaves.get(&SlaveId::new("s1")),
            Some(Slave { .. })
        ));
    }
}
