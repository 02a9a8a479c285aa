//! In-process wiring for local development: scheduler and executor joined by
//! channel-backed drivers, with the mock container runtime standing in for a
//! real worker node.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use stevedore_core::{
    Offer, OfferId, PodKey, ResourceBundle, SlaveId, TaskId, TaskInfo, TaskStatus,
};
use stevedore_executor::{Executor, ExecutorDriver, MockRuntime, PodUpdate};
use stevedore_scheduler::{
    Binding, ControlPlane, FrameworkScheduler, SchedulerDriver, SchedulerError,
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outbound driver calls routed to the in-process executor
pub enum DriverCall {
    Launch {
        offer_id: OfferId,
        tasks: Vec<TaskInfo>,
    },
    Kill {
        task_id: TaskId,
    },
}

/// Scheduler driver that forwards calls over a channel
pub struct ChannelSchedulerDriver {
    tx: UnboundedSender<DriverCall>,
}

impl ChannelSchedulerDriver {
    pub fn new(tx: UnboundedSender<DriverCall>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl SchedulerDriver for ChannelSchedulerDriver {
    async fn launch_tasks(
        &self,
        offer_id: &OfferId,
        tasks: &[TaskInfo],
    ) -> stevedore_scheduler::Result<()> {
        self.tx
            .send(DriverCall::Launch {
                offer_id: offer_id.clone(),
                tasks: tasks.to_vec(),
            })
            .map_err(|_| SchedulerError::driver("executor channel closed"))
    }

    async fn kill_task(&self, task_id: &TaskId) -> stevedore_scheduler::Result<()> {
        self.tx
            .send(DriverCall::Kill {
                task_id: task_id.clone(),
            })
            .map_err(|_| SchedulerError::driver("executor channel closed"))
    }
}

/// Executor driver that forwards status updates over a channel
pub struct ChannelExecutorDriver {
    tx: UnboundedSender<TaskStatus>,
}

impl ChannelExecutorDriver {
    pub fn new(tx: UnboundedSender<TaskStatus>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ExecutorDriver for ChannelExecutorDriver {
    async fn send_status_update(&self, status: TaskStatus) -> stevedore_executor::Result<()> {
        self.tx
            .send(status)
            .map_err(|_| stevedore_executor::ExecutorError::driver("framework channel closed"))
    }
}

/// In-memory control plane for local mode
#[derive(Default)]
pub struct LocalControlPlane {
    pods: Mutex<HashMap<PodKey, Pod>>,
    services: Mutex<Vec<Service>>,
}

impl LocalControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_pod(&self, key: PodKey, pod: Pod) {
        self.pods.lock().unwrap().insert(key, pod);
    }
}

#[async_trait]
impl ControlPlane for LocalControlPlane {
    async fn get_pod(&self, namespace: &str, name: &str) -> stevedore_scheduler::Result<Pod> {
        self.pods
            .lock()
            .unwrap()
            .get(&PodKey::new(namespace, name))
            .cloned()
            .ok_or_else(|| SchedulerError::api(format!("pod {}/{} not found", namespace, name)))
    }

    async fn list_services(&self, _namespace: &str) -> stevedore_scheduler::Result<Vec<Service>> {
        Ok(self.services.lock().unwrap().clone())
    }

    async fn create_binding(
        &self,
        namespace: &str,
        binding: &Binding,
    ) -> stevedore_scheduler::Result<()> {
        let key = PodKey::new(namespace, &binding.pod_id);
        let mut pods = self.pods.lock().unwrap();
        let pod = pods
            .get_mut(&key)
            .ok_or_else(|| SchedulerError::api(format!("pod {} not found", key)))?;
        pod.spec.get_or_insert_with(Default::default).node_name = Some(binding.host.clone());
        info!(pod = %key, host = %binding.host, "Binding accepted");
        Ok(())
    }
}

/// Forward driver calls from the scheduler into the executor
pub async fn pump_driver_calls(
    executor: Arc<Executor>,
    mut rx: UnboundedReceiver<DriverCall>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            call = rx.recv() => {
                let Some(call) = call else { return };
                match call {
                    DriverCall::Launch { offer_id, tasks } => {
                        info!(offer = %offer_id, count = tasks.len(), "Delivering launch to executor");
                        for task in tasks {
                            executor.launch_task(task).await;
                        }
                    }
                    DriverCall::Kill { task_id } => {
                        executor.kill_task(&task_id).await;
                    }
                }
            }
        }
    }
}

/// Forward executor status updates into the framework callbacks
pub async fn pump_status_updates(
    framework: Arc<FrameworkScheduler>,
    mut rx: UnboundedReceiver<TaskStatus>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            status = rx.recv() => {
                let Some(status) = status else { return };
                info!(
                    task = %status.task_id,
                    state = %status.state,
                    message = status.message.as_deref().unwrap_or(""),
                    "Status update"
                );
                framework.status_update(status).await;
            }
        }
    }
}

/// Converge the mock runtime to each desired-state push, standing in for the
/// worker-side pod lifecycle: new pods come up, removed pods disappear.
pub async fn pump_runtime_updates(
    runtime: Arc<MockRuntime>,
    mut rx: UnboundedReceiver<PodUpdate>,
    token: CancellationToken,
) {
    let mut known: HashSet<PodKey> = HashSet::new();
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            update = rx.recv() => {
                let Some(update) = update else { return };
                let desired: HashSet<PodKey> = update
                    .pods
                    .iter()
                    .filter_map(|p| PodKey::from_pod(p).ok())
                    .collect();

                for key in desired.difference(&known) {
                    info!(pod = %key, "Runtime starting pod");
                    runtime.set_pod_running(key.clone());
                }
                for key in known.difference(&desired) {
                    info!(pod = %key, "Runtime tearing down pod");
                    runtime.remove_pod(key);
                }
                known = desired;
            }
        }
    }
}

/// A synthetic offer from the local pseudo-slave
pub fn local_offer(cpus: f64, mem_mb: f64) -> Offer {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    Offer {
        id: OfferId::new("local-offer-1"),
        slave_id: SlaveId::new("local-slave"),
        hostname,
        resources: ResourceBundle::new(cpus, mem_mb),
    }
}

/// A demo pod used when no manifest is supplied
pub fn demo_pod() -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some("demo".to_string());
    pod.metadata.namespace = Some("default".to_string());
    pod.spec = Some(Default::default());
    pod.spec.as_mut().unwrap().containers = vec![k8s_openapi::api::core::v1::Container {
        name: "app".to_string(),
        image: Some("nginx".to_string()),
        ..Default::default()
    }];
    pod
}

/// Load a pod manifest from a YAML file
pub fn load_pod_manifest(path: &std::path::Path) -> miette::Result<Pod> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read pod manifest '{}': {}", path.display(), e))?;
    let pod: Pod = serde_yaml::from_str(&data)
        .map_err(|e| miette::miette!("Failed to parse pod manifest '{}': {}", path.display(), e))?;
    if pod.metadata.name.is_none() {
        warn!("Pod manifest has no metadata.name; it will be rejected by the scheduler");
    }
    Ok(pod)
}
