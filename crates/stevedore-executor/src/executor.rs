use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use stevedore_core::{
    from_yaml, to_json, PodKey, TaskId, TaskInfo, TaskState, TaskStatus,
    CONFIG_SOURCE_ANNOTATION,
};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::runtime::{network_running, PodRuntime, PodUpdate};

/// Outbound status updates to the slave
#[async_trait]
pub trait ExecutorDriver: Send + Sync {
    async fn send_status_update(&self, status: TaskStatus) -> Result<()>;
}

/// Configuration for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Config source name stamped into each bound pod's annotations
    pub source_name: String,
    /// Interval between container-runtime polls
    pub poll_interval: Duration,
    /// How long a launch may take before the task is reported lost
    pub launch_grace_period: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            source_name: "stevedore".to_string(),
            poll_interval: Duration::from_millis(300),
            launch_grace_period: Duration::from_secs(5 * 60),
        }
    }
}

struct LaunchedTask {
    task_info: TaskInfo,
    pod_key: PodKey,
}

#[derive(Default)]
struct ExecutorState {
    registered: bool,
    tasks: HashMap<TaskId, LaunchedTask>,
    pods: HashMap<PodKey, Pod>,
}

impl ExecutorState {
    fn desired_pods(&self) -> Vec<Pod> {
        self.pods.values().cloned().collect()
    }
}

/// Slave-side executor that runs pods on a worker node.
///
/// Feeds launched pods into the local container runtime, polls until each
/// workload is reported ready, then monitors for disappearance and reports
/// terminal status back through the driver. Cloning is cheap: clones share
/// the same bookkeeping, which is how the spawned watchers hold on to it.
#[derive(Clone)]
pub struct Executor {
    driver: Arc<dyn ExecutorDriver>,
    runtime: Arc<dyn PodRuntime>,
    updates: UnboundedSender<PodUpdate>,
    config: ExecutorConfig,
    state: Arc<RwLock<ExecutorState>>,
}

impl Executor {
    pub fn new(
        driver: Arc<dyn ExecutorDriver>,
        runtime: Arc<dyn PodRuntime>,
        updates: UnboundedSender<PodUpdate>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            driver,
            runtime,
            updates,
            config,
            state: Arc::new(RwLock::new(ExecutorState::default())),
        }
    }

    /// Driver callback: registered with the slave
    pub async fn registered(&self) {
        info!("Executor registered with slave");
        self.state.write().await.registered = true;
    }

    /// Driver callback: re-registered after a slave failover
    pub async fn reregistered(&self) {
        info!("Executor re-registered with slave");
        self.state.write().await.registered = true;
    }

    /// Driver callback: the slave connection dropped
    pub async fn disconnected(&self) {
        info!("Slave is disconnected");
        self.state.write().await.registered = false;
    }

    /// Driver callback: launch a task carrying a YAML bound pod
    pub async fn launch_task(&self, task_info: TaskInfo) {
        info!(task = %task_info.task_id, "Launch task");

        if !self.state.read().await.registered {
            warn!("Ignoring launch task because the executor is disconnected");
            self.send_status(TaskStatus::with_message(
                task_info.task_id.clone(),
                TaskState::Failed,
                "Executor not registered yet",
            ))
            .await;
            return;
        }

        let mut state = self.state.write().await;

        if state.tasks.contains_key(&task_info.task_id) {
            // May be a duplicated message or a reused task id; do not send
            // TASK_RUNNING back for it
            warn!(task = %task_info.task_id, "Task already launched");
            return;
        }

        let payload = String::from_utf8_lossy(&task_info.data);
        let mut pod: Pod = match from_yaml(&payload) {
            Ok(pod) => pod,
            Err(e) => {
                warn!(task = %task_info.task_id, error = %e, "Failed to extract bound pod from task payload");
                drop(state);
                self.send_status(TaskStatus::with_message(
                    task_info.task_id.clone(),
                    TaskState::Failed,
                    "Failed to extract yaml data",
                ))
                .await;
                return;
            }
        };

        let pod_key = match PodKey::from_pod(&pod) {
            Ok(key) => key,
            Err(e) => {
                warn!(task = %task_info.task_id, error = %e, "Bound pod has no identity");
                drop(state);
                self.send_status(TaskStatus::with_message(
                    task_info.task_id.clone(),
                    TaskState::Failed,
                    "Failed to extract yaml data",
                ))
                .await;
                return;
            }
        };

        pod.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(
                CONFIG_SOURCE_ANNOTATION.to_string(),
                self.config.source_name.clone(),
            );

        let task_id = task_info.task_id.clone();
        state.tasks.insert(
            task_id.clone(),
            LaunchedTask {
                task_info,
                pod_key: pod_key.clone(),
            },
        );
        state.pods.insert(pod_key.clone(), pod);
        self.push_desired_set(&state);
        drop(state);

        // Delay reporting TASK_RUNNING until the container is up
        let executor = self.clone();
        tokio::spawn(async move {
            executor.watch_launch(task_id, pod_key).await;
        });
    }

    /// Poll the runtime until the pod's network sandbox is running, then
    /// report TASK_RUNNING and hand off to the monitor. Reports TASK_LOST if
    /// the grace period elapses first.
    async fn watch_launch(&self, task_id: TaskId, pod_key: PodKey) {
        let expires = Instant::now() + self.config.launch_grace_period;

        loop {
            if Instant::now() > expires {
                warn!(
                    task = %task_id,
                    grace = ?self.config.launch_grace_period,
                    "Launch expired grace period"
                );
                break;
            }

            // No event model for pod state; poll the runtime
            tokio::time::sleep(self.config.poll_interval).await;

            let Ok(info) = self.runtime.pod_info(&pod_key).await else {
                continue;
            };

            // Avoid reporting running while pod networking is down
            if !network_running(&info) {
                continue;
            }

            // The task may have been killed while we were waiting
            if !self.state.read().await.tasks.contains_key(&task_id) {
                debug!(task = %task_id, "Task removed before it came up, stopping watcher");
                return;
            }

            debug!(task = %task_id, pod = %pod_key, "Found pod info");
            let data = to_json(&info).map(String::into_bytes).unwrap_or_default();

            let status = TaskStatus {
                task_id: task_id.clone(),
                state: TaskState::Running,
                message: Some(format!("Pod '{}' is running", pod_key)),
                data,
            };
            self.send_status(status).await;

            let executor = self.clone();
            tokio::spawn(async move {
                executor.monitor_pod(task_id, pod_key).await;
            });
            return;
        }

        let mut state = self.state.write().await;
        self.report_lost_task(&mut state, &task_id, "Task lost: launch failed")
            .await;
    }

    /// Wait for the pod to go away and stop monitoring once it does
    async fn monitor_pod(&self, task_id: TaskId, pod_key: PodKey) {
        loop {
            tokio::time::sleep(self.config.poll_interval).await;

            if !self.state.read().await.tasks.contains_key(&task_id) {
                debug!(task = %task_id, "Task no longer registered, stopping lost-pod monitor");
                return;
            }

            if self.runtime.pod_info(&pod_key).await.is_ok() {
                continue;
            }

            // The runtime lost the pod; re-check under the write lock before
            // reporting, the task may have been killed meanwhile
            let mut state = self.state.write().await;
            if !state.tasks.contains_key(&task_id) {
                return;
            }
            warn!(task = %task_id, pod = %pod_key, "Detected lost pod, reporting lost task");
            self.report_lost_task(&mut state, &task_id, "Task lost: container disappeared")
                .await;
            return;
        }
    }

    /// Driver callback: kill a task.
    ///
    /// When disconnected the request is dropped without a TASK_LOST; the
    /// scheduler reconciles such tasks through slave-lost handling.
    pub async fn kill_task(&self, task_id: &TaskId) {
        let mut state = self.state.write().await;

        info!(task = %task_id, "Kill task");

        if !state.registered {
            warn!(task = %task_id, "Ignoring kill task because the executor is disconnected");
            return;
        }

        self.kill_pod_for_task(&mut state, task_id, "Task killed")
            .await;
    }

    /// Driver callback: shut down, killing every task first
    pub async fn shutdown(&self) {
        info!("Shutting down the executor");

        let mut state = self.state.write().await;
        let task_ids: Vec<TaskId> = state.tasks.keys().cloned().collect();
        for task_id in task_ids {
            self.kill_pod_for_task(&mut state, &task_id, "Executor shutdown")
                .await;
        }
    }

    /// Driver callback: a message from the framework; log only
    pub async fn framework_message(&self, message: &str) {
        info!(message, "Received message from framework");
    }

    /// Driver callback: a fatal driver error; log only
    pub async fn error(&self, message: &str) {
        error!(message, "Executor error");
    }

    /// Kill the pod associated with a task and report TASK_KILLED.
    /// The caller holds the write lock.
    async fn kill_pod_for_task(&self, state: &mut ExecutorState, task_id: &TaskId, reason: &str) {
        let Some(task) = state.tasks.remove(task_id) else {
            info!(task = %task_id, "Failed to kill task, unknown task");
            return;
        };

        if state.pods.remove(&task.pod_key).is_none() {
            warn!(pod = %task.pod_key, task = %task_id, "Cannot remove unknown pod for task");
        } else {
            debug!(pod = %task.pod_key, task = %task_id, "Deleting pod for task");
            self.push_desired_set(state);
        }

        self.send_status(TaskStatus::with_message(
            task.task_info.task_id.clone(),
            TaskState::Killed,
            reason,
        ))
        .await;
    }

    /// Remove a lost task from the bookkeeping and report TASK_LOST.
    /// The caller holds the write lock.
    async fn report_lost_task(&self, state: &mut ExecutorState, task_id: &TaskId, reason: &str) {
        let Some(task) = state.tasks.remove(task_id) else {
            info!(task = %task_id, "Failed to report lost task, unknown task");
            return;
        };

        if state.pods.remove(&task.pod_key).is_none() {
            warn!(pod = %task.pod_key, task = %task_id, "Cannot remove unknown pod for lost task");
        } else {
            debug!(pod = %task.pod_key, task = %task_id, "Deleting pod for lost task");
            self.push_desired_set(state);
        }

        self.send_status(TaskStatus::with_message(
            task.task_info.task_id.clone(),
            TaskState::Lost,
            reason,
        ))
        .await;
    }

    /// Push the complete current pod set to the container runtime
    fn push_desired_set(&self, state: &ExecutorState) {
        if self
            .updates
            .send(PodUpdate::set(state.desired_pods()))
            .is_err()
        {
            warn!("Pod update channel closed; runtime will not converge");
        }
    }

    async fn send_status(&self, status: TaskStatus) {
        if let Err(e) = self.driver.send_status_update(status).await {
            warn!(error = %e, "Failed to send status update");
        }
    }

    #[cfg(test)]
    async fn task_count(&self) -> usize {
        self.state.read().await.tasks.len()
    }
}
