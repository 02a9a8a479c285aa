use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use stevedore_core::{
    FrameworkId, Offer, OfferId, PodKey, SlaveId, TaskId, TaskInfo, TaskState, TaskStatus,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::offers::{OfferRegistry, OfferRegistryConfig};
use crate::task::{PodTask, PodTaskState, TaskRegistry};

/// Outbound calls to the resource-manager driver
#[async_trait]
pub trait SchedulerDriver: Send + Sync {
    /// Launch tasks against a consumed offer
    async fn launch_tasks(&self, offer_id: &OfferId, tasks: &[TaskInfo]) -> Result<()>;

    /// Ask the executor owning the task to kill it
    async fn kill_task(&self, task_id: &TaskId) -> Result<()>;
}

/// A worker node, learned from its offers
#[derive(Debug, Clone)]
pub struct Slave {
    pub id: SlaveId,
    pub hostname: String,
}

/// The state guarded by the coarse scheduler lock: task registries, the
/// pod-to-task map, and the slave map.
#[derive(Default)]
pub struct SchedulerState {
    pub framework_id: Option<FrameworkId>,
    pub tasks: TaskRegistry,
    pub slaves: HashMap<SlaveId, Slave>,
}

/// The capability surface the scheduling components need from the locked
/// state. Narrower than `SchedulerState` itself so tests can supply a fake.
pub trait SchedulerOps {
    fn task_for_pod(&self, key: &PodKey) -> Option<TaskId>;
    fn get_task(&self, id: &TaskId) -> Option<&PodTask>;
    fn get_task_mut(&mut self, id: &TaskId) -> Option<&mut PodTask>;
    fn register_task(&mut self, task: PodTask) -> TaskId;
    fn unregister_task(&mut self, id: &TaskId) -> Option<PodTask>;
    fn slave_hostname(&self, id: &SlaveId) -> Option<String>;
}

impl SchedulerOps for SchedulerState {
    fn task_for_pod(&self, key: &PodKey) -> Option<TaskId> {
        self.tasks.task_for_pod(key)
    }

    fn get_task(&self, id: &TaskId) -> Option<&PodTask> {
        self.tasks.get(id)
    }

    fn get_task_mut(&mut self, id: &TaskId) -> Option<&mut PodTask> {
        self.tasks.get_mut(id)
    }

    fn register_task(&mut self, task: PodTask) -> TaskId {
        self.tasks.register(task)
    }

    fn unregister_task(&mut self, id: &TaskId) -> Option<PodTask> {
        self.tasks.unregister(id)
    }

    fn slave_hostname(&self, id: &SlaveId) -> Option<String> {
        self.slaves.get(id).map(|s| s.hostname.clone())
    }
}

/// The framework half of the two-level scheduler: holds the coarse lock,
/// the offer registry, and the driver, and implements the inbound driver
/// callbacks.
pub struct FrameworkScheduler {
    pub state: Arc<RwLock<SchedulerState>>,
    pub offers: Arc<OfferRegistry>,
    pub driver: Arc<dyn SchedulerDriver>,
    pub executor_id: stevedore_core::ExecutorId,
}

impl FrameworkScheduler {
    pub fn new(
        driver: Arc<dyn SchedulerDriver>,
        executor_id: stevedore_core::ExecutorId,
        offer_config: OfferRegistryConfig,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(SchedulerState::default())),
            offers: Arc::new(OfferRegistry::new(offer_config)),
            driver,
            executor_id,
        }
    }

    /// Driver callback: the framework registered with the master
    pub async fn registered(&self, framework_id: FrameworkId) {
        info!(framework = %framework_id, "Framework registered");
        self.state.write().await.framework_id = Some(framework_id);
    }

    /// Driver callback: the framework re-registered after a master failover
    pub async fn reregistered(&self, framework_id: FrameworkId) {
        info!(framework = %framework_id, "Framework re-registered");
        self.state.write().await.framework_id = Some(framework_id);
    }

    /// Driver callback: new resource offers arrived.
    ///
    /// Slaves are recorded under the write lock first; the lock is dropped
    /// before listeners fire so their predicates can take the read lock.
    pub async fn resource_offers(&self, offers: Vec<Offer>) {
        {
            let mut state = self.state.write().await;
            for offer in &offers {
                state
                    .slaves
                    .entry(offer.slave_id.clone())
                    .or_insert_with(|| Slave {
                        id: offer.slave_id.clone(),
                        hostname: offer.hostname.clone(),
                    });
            }
        }

        for offer in offers {
            debug!(offer = %offer.id, slave = %offer.slave_id, "Received offer");
            self.offers.add(offer);
        }
    }

    /// Driver callback: the master withdrew an offer
    pub async fn offer_rescinded(&self, offer_id: &OfferId) {
        info!(offer = %offer_id, "Offer rescinded");
        self.offers.invalidate(offer_id);
    }

    /// Driver callback: a task changed state on its slave
    pub async fn status_update(&self, status: TaskStatus) {
        let mut state = self.state.write().await;

        let Some(task) = state.get_task_mut(&status.task_id) else {
            warn!(task = %status.task_id, state = %status.state, "Status update for unknown task");
            return;
        };

        debug!(task = %status.task_id, state = %status.state, "Status update");

        match status.state {
            TaskState::Running => {
                task.state = PodTaskState::Running;
            }
            TaskState::Finished
            | TaskState::Failed
            | TaskState::Killed
            | TaskState::Lost => {
                task.state = PodTaskState::Finished;
                let offer_id = task.offer_id.clone();
                state.unregister_task(&status.task_id);
                if let Some(offer_id) = offer_id {
                    self.offers.release(&offer_id);
                }
            }
            TaskState::Staging | TaskState::Starting => {}
        }
    }

    /// Driver callback: a slave disappeared. Its offers become unusable;
    /// its tasks will be surfaced by subsequent TASK_LOST updates.
    pub async fn slave_lost(&self, slave_id: &SlaveId) {
        warn!(slave = %slave_id, "Slave lost");
        self.state.write().await.slaves.remove(slave_id);
        self.offers.invalidate_for_slave(slave_id);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Driver double that records every call
    #[derive(Default)]
    pub struct RecordingDriver {
        pub launches: Mutex<Vec<(OfferId, Vec<TaskInfo>)>>,
        pub kills: Mutex<Vec<TaskId>>,
        pub fail_launches: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl SchedulerDriver for RecordingDriver {
        async fn launch_tasks(&self, offer_id: &OfferId, tasks: &[TaskInfo]) -> Result<()> {
            if self.fail_launches.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(crate::error::SchedulerError::driver("launch refused"));
            }
            self.launches
                .lock()
                .unwrap()
                .push((offer_id.clone(), tasks.to_vec()));
            Ok(())
        }

        async fn kill_task(&self, task_id: &TaskId) -> Result<()> {
            self.kills.lock().unwrap().push(task_id.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingDriver;
    use super::*;
    use k8s_openapi::api::core::v1::Pod;
    use stevedore_core::{ExecutorId, ResourceBundle};

    fn scheduler() -> (Arc<FrameworkScheduler>, Arc<RecordingDriver>) {
        let driver = Arc::new(RecordingDriver::default());
        let framework = Arc::new(FrameworkScheduler::new(
            driver.clone(),
            ExecutorId::new("stevedore-executor"),
            OfferRegistryConfig::default(),
        ));
        (framework, driver)
    }

    fn offer(id: &str, slave: &str) -> Offer {
        Offer {
            id: OfferId::new(id),
            slave_id: SlaveId::new(slave),
            hostname: format!("{}.example.com", slave),
            resources: ResourceBundle::new(4.0, 4096.0),
        }
    }

    fn pod(name: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some("default".to_string());
        pod.spec = Some(Default::default());
        pod
    }

    #[tokio::test]
    async fn test_offers_record_slaves() {
        let (framework, _) = scheduler();
        framework.resource_offers(vec![offer("o1", "s1")]).await;

        let state = framework.state.read().await;
        assert_eq!(
            state.slave_hostname(&SlaveId::new("s1")).as_deref(),
            Some("s1.example.com")
        );
        assert!(framework.offers.get(&OfferId::new("o1")).is_some());
    }

    #[tokio::test]
    async fn test_rescind_invalidates() {
        let (framework, _) = scheduler();
        framework.resource_offers(vec![offer("o1", "s1")]).await;
        framework.offer_rescinded(&OfferId::new("o1")).await;
        assert!(framework.offers.get(&OfferId::new("o1")).is_none());
    }

    #[tokio::test]
    async fn test_status_update_running_then_terminal() {
        let (framework, _) = scheduler();
        let task = PodTask::new(pod("foo"), ExecutorId::new("exec")).unwrap();
        let key = task.key.clone();
        let task_id = framework.state.write().await.register_task(task);

        framework
            .status_update(TaskStatus::with_message(
                task_id.clone(),
                TaskState::Running,
                "running",
            ))
            .await;
        {
            let state = framework.state.read().await;
            assert_eq!(
                state.get_task(&task_id).unwrap().state,
                PodTaskState::Running
            );
        }

        framework
            .status_update(TaskStatus::with_message(
                task_id.clone(),
                TaskState::Lost,
                "slave went away",
            ))
            .await;
        let state = framework.state.read().await;
        assert!(state.get_task(&task_id).is_none());
        assert!(state.task_for_pod(&key).is_none());
    }

    #[tokio::test]
    async fn test_slave_lost_drops_offers() {
        let (framework, _) = scheduler();
        framework
            .resource_offers(vec![offer("o1", "s1"), offer("o2", "s2")])
            .await;

        framework.slave_lost(&SlaveId::new("s1")).await;

        assert!(framework.offers.get(&OfferId::new("o1")).is_none());
        assert!(framework.offers.get(&OfferId::new("o2")).is_some());
        let state = framework.state.read().await;
        assert!(state.slave_hostname(&SlaveId::new("s1")).is_none());
        assert!(state.slave_hostname(&SlaveId::new("s2")).is_some());
    }
}
