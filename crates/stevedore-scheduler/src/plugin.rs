use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::algorithm::Algorithm;
use crate::binder::Binder;
use crate::client::ControlPlane;
use crate::deleter::Deleter;
use crate::error_handler::ErrorHandler;
use crate::framework::FrameworkScheduler;
use crate::queue::{DelayQueue, HistoricalStore, StoreEntry};
use crate::queuer::Queuer;

/// The assembled scheduling plugin: queues, algorithm, binder, error handler,
/// and deleter wired around one framework scheduler.
pub struct SchedulerPlugin {
    pub store: Arc<HistoricalStore>,
    pub queuer: Arc<Queuer>,
    algorithm: Algorithm,
    binder: Binder,
    error_handler: ErrorHandler,
    deleter: Deleter,
    updates: std::sync::Mutex<Option<UnboundedReceiver<StoreEntry>>>,
}

impl SchedulerPlugin {
    /// Wire the plugin and all supporting components
    pub fn new(
        scheduler: Arc<FrameworkScheduler>,
        client: Arc<dyn ControlPlane>,
        source_name: impl Into<String>,
    ) -> Self {
        let (store, updates) = HistoricalStore::new();
        let store = Arc::new(store);
        let queue = Arc::new(DelayQueue::new());
        let queuer = Arc::new(Queuer::new(store.clone(), queue.clone()));

        Self {
            store: store.clone(),
            queuer: queuer.clone(),
            algorithm: Algorithm::new(scheduler.clone(), store),
            binder: Binder::new(scheduler.clone(), client, source_name),
            error_handler: ErrorHandler::new(scheduler.clone(), queuer.clone()),
            deleter: Deleter::new(scheduler, queuer),
            updates: std::sync::Mutex::new(Some(updates)),
        }
    }

    /// One pass of the scheduling loop over an already-yielded pod:
    /// schedule, then bind, handing any failure to the error handler.
    pub async fn schedule_one(&self, pod: &Pod) {
        match self.algorithm.schedule(pod).await {
            Ok(host) => {
                if let Err(err) = self.binder.bind(pod, &host).await {
                    debug!(error = %err, "Bind failed");
                    self.error_handler.handle(pod, &err).await;
                }
            }
            Err(err) => {
                debug!(error = %err, "Schedule failed");
                self.error_handler.handle(pod, &err).await;
            }
        }
    }

    /// Run the queuer, the deleter, and the scheduling loop until cancelled
    pub async fn run(&self, token: CancellationToken) {
        info!("Starting scheduler plugin");

        let updates = self
            .updates
            .lock()
            .unwrap()
            .take()
            .expect("scheduler plugin started twice");

        let queuer = self.queuer.clone();
        let queuer_token = token.clone();
        let deleter_token = token.clone();

        tokio::join!(
            queuer.run(queuer_token),
            self.deleter.run(updates, deleter_token),
            async {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => {
                            return;
                        }
                        pod = self.queuer.yield_pod() => {
                            self.schedule_one(&pod).await;
                        }
                    }
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::test_support::FakeControlPlane;
    use crate::error::SchedulerError;
    use crate::framework::test_support::RecordingDriver;
    use crate::framework::SchedulerOps;
    use crate::offers::OfferRegistryConfig;
    use crate::queuer::pod_host;
    use crate::task::PodTaskState;
    use std::time::Duration;
    use stevedore_core::{
        ExecutorId, Offer, OfferId, PodKey, ResourceBundle, SlaveId, TaskState, TaskStatus,
    };

    fn pod(name: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod.spec = Some(Default::default());
        pod.spec.as_mut().unwrap().containers = vec![Default::default()];
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

    struct Fixture {
        scheduler: Arc<FrameworkScheduler>,
        driver: Arc<RecordingDriver>,
        control_plane: Arc<FakeControlPlane>,
        plugin: SchedulerPlugin,
    }

    fn fixture() -> Fixture {
        let driver = Arc::new(RecordingDriver::default());
        let scheduler = Arc::new(FrameworkScheduler::new(
            driver.clone(),
            ExecutorId::new("stevedore-executor"),
            OfferRegistryConfig::default(),
        ));
        let control_plane = Arc::new(FakeControlPlane::default());
        let plugin = SchedulerPlugin::new(scheduler.clone(), control_plane.clone(), "stevedore");
        Fixture {
            scheduler,
            driver,
            control_plane,
            plugin,
        }
    }

    /// Scenario: reflector emits ADD, an offer arrives, and the pod flows
    /// through queue, algorithm, binder, and launch.
    #[tokio::test]
    async fn test_end_to_end_happy_path() {
        let f = fixture();
        let p = pod("foo");
        let key = PodKey::new("default", "foo");
        f.control_plane.pods.lock().unwrap().push(p.clone());

        f.scheduler.resource_offers(vec![offer("o1", "s1")]).await;
        f.plugin.store.add(key.clone(), p);

        let token = CancellationToken::new();
        let run_token = token.clone();
        let run = async { f.plugin.run(run_token).await };

        let check = async {
            for _ in 0..100 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if !f.driver.launches.lock().unwrap().is_empty() {
                    break;
                }
            }
            token.cancel();
        };
        tokio::join!(run, check);

        // Binding POSTed with the chosen host
        let bindings = f.control_plane.bindings.lock().unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].1.host, "s1.example.com");

        // Task launched against O1, which is no longer in the registry
        let launches = f.driver.launches.lock().unwrap();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].0, OfferId::new("o1"));
        assert!(f.scheduler.offers.get(&OfferId::new("o1")).is_none());

        // Scheduler-local pod record carries the host
        let state = f.scheduler.state.read().await;
        let task_id = state.task_for_pod(&key).unwrap();
        let task = state.get_task(&task_id).unwrap();
        assert!(task.launched);
        assert_eq!(pod_host(&task.pod), Some("s1.example.com"));
    }

    /// Scenario: offer rescinded between schedule and bind; the error
    /// handler requeues with backoff and a listener.
    #[tokio::test]
    async fn test_rescind_between_schedule_and_bind_requeues() {
        let f = fixture();
        let p = pod("foo");
        let key = PodKey::new("default", "foo");
        f.control_plane.pods.lock().unwrap().push(p.clone());
        f.scheduler.resource_offers(vec![offer("o1", "s1")]).await;

        let host = f.plugin.algorithm.schedule(&p).await.unwrap();
        f.scheduler.offer_rescinded(&OfferId::new("o1")).await;

        let err = f.plugin.binder.bind(&p, &host).await.unwrap_err();
        assert!(matches!(err, SchedulerError::OfferExpired { .. }));
        f.plugin.error_handler.handle(&p, &err).await;

        // The pod waits out its backoff in the delay queue
        let state = f.scheduler.state.read().await;
        let task_id = state.task_for_pod(&key).unwrap();
        assert_eq!(state.get_task(&task_id).unwrap().state, PodTaskState::Pending);
        assert!(!state.get_task(&task_id).unwrap().launched);
    }

    /// Scenario: pod deleted while the algorithm is in flight; the deleter
    /// cleans up and a late bind sees NoSuchPod.
    #[tokio::test]
    async fn test_delete_during_scheduling_aborts_bind() {
        let f = fixture();
        let p = pod("foo");
        let key = PodKey::new("default", "foo");
        f.control_plane.pods.lock().unwrap().push(p.clone());
        f.scheduler.resource_offers(vec![offer("o1", "s1")]).await;

        let host = f.plugin.algorithm.schedule(&p).await.unwrap();

        // DELETE lands after the algorithm finished
        f.plugin.deleter.delete_one(&key).await.unwrap();

        let err = f.plugin.binder.bind(&p, &host).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoSuchPod));
        assert!(f.driver.launches.lock().unwrap().is_empty());
    }

    /// Scenario: slave lost with a running task; offers invalidated and the
    /// subsequent TASK_LOST unregisters the task, making the pod
    /// re-schedulable.
    #[tokio::test]
    async fn test_slave_lost_then_task_lost() {
        let f = fixture();
        let p = pod("foo");
        let key = PodKey::new("default", "foo");
        f.control_plane.pods.lock().unwrap().push(p.clone());
        f.scheduler.resource_offers(vec![offer("o1", "s1")]).await;

        let host = f.plugin.algorithm.schedule(&p).await.unwrap();
        f.plugin.binder.bind(&p, &host).await.unwrap();

        f.scheduler.slave_lost(&SlaveId::new("s1")).await;

        let task_id = {
            let state = f.scheduler.state.read().await;
            state.task_for_pod(&key).unwrap()
        };
        f.scheduler
            .status_update(TaskStatus::with_message(
                task_id.clone(),
                TaskState::Lost,
                "slave lost",
            ))
            .await;

        let state = f.scheduler.state.read().await;
        assert!(state.task_for_pod(&key).is_none());
        assert!(state.get_task(&task_id).is_none());
    }
}
