use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use stevedore_core::PodKey;

use crate::error::{ExecutorError, Result};

/// Name of the synthetic container representing a pod's network sandbox.
/// A pod is not reported running until this container is up.
pub const NETWORK_CONTAINER: &str = "net";

/// Desired-state operations pushed to the container runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodUpdateOp {
    /// Replace the runtime's desired pod set wholesale
    Set,
}

/// A desired-state push to the local container runtime.
///
/// The executor always sends the complete current pod set so the runtime
/// converges to its bookkeeping; partial updates are not used.
#[derive(Debug, Clone)]
pub struct PodUpdate {
    pub op: PodUpdateOp,
    pub pods: Vec<Pod>,
}

impl PodUpdate {
    pub fn set(pods: Vec<Pod>) -> Self {
        Self {
            op: PodUpdateOp::Set,
            pods,
        }
    }
}

/// Observed state of one container in a pod
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub running: bool,
}

/// Observed pod state, keyed by container name
pub type PodInfo = HashMap<String, ContainerInfo>;

/// True once the pod's network sandbox is reported running
pub fn network_running(info: &PodInfo) -> bool {
    info.get(NETWORK_CONTAINER).is_some_and(|c| c.running)
}

/// Query interface over the local container runtime.
///
/// The runtime offers no event stream for pod state, so the executor polls.
#[async_trait]
pub trait PodRuntime: Send + Sync {
    /// Container info for a pod; `PodNotFound` when the runtime has no record
    async fn pod_info(&self, key: &PodKey) -> Result<PodInfo>;
}

/// In-memory runtime for tests and local development
#[derive(Default)]
pub struct MockRuntime {
    pods: Mutex<HashMap<PodKey, PodInfo>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pod whose containers (including the network sandbox) are up
    pub fn set_pod_running(&self, key: PodKey) {
        let mut info = PodInfo::new();
        info.insert(
            NETWORK_CONTAINER.to_string(),
            ContainerInfo { running: true },
        );
        self.pods.lock().unwrap().insert(key, info);
    }

    /// Record a pod that exists but whose network sandbox is still down
    pub fn set_pod_starting(&self, key: PodKey) {
        let mut info = PodInfo::new();
        info.insert(
            NETWORK_CONTAINER.to_string(),
            ContainerInfo { running: false },
        );
        self.pods.lock().unwrap().insert(key, info);
    }

    /// Forget a pod entirely
    pub fn remove_pod(&self, key: &PodKey) {
        self.pods.lock().unwrap().remove(key);
    }
}

#[async_trait]
impl PodRuntime for MockRuntime {
    async fn pod_info(&self, key: &PodKey) -> Result<PodInfo> {
        self.pods
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| ExecutorError::PodNotFound { key: key.clone() })
    }
}
