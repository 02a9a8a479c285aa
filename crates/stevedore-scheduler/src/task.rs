use std::collections::HashMap;

use k8s_openapi::api::core::v1::Pod;
use stevedore_core::{
    pod_resources, ExecutorId, Offer, OfferId, PodKey, ResourceBundle, TaskId, TaskInfo,
};

use crate::error::Result;

/// Lifecycle state of a pod task inside the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodTaskState {
    Pending,
    Running,
    Finished,
}

/// A pod awaiting or undergoing execution as a resource-manager task.
///
/// The task and its offer reference each other through identifiers only;
/// the offer registry stays the single owner of offer state.
pub struct PodTask {
    pub id: TaskId,
    pub key: PodKey,
    pub pod: Pod,
    pub demand: ResourceBundle,
    pub offer_id: Option<OfferId>,
    pub task_info: Option<TaskInfo>,
    pub launched: bool,
    pub deleted: bool,
    pub state: PodTaskState,
    executor_id: ExecutorId,
}

impl PodTask {
    /// Create a pending task for a pod the scheduler has not seen before
    pub fn new(pod: Pod, executor_id: ExecutorId) -> Result<Self> {
        let key = PodKey::from_pod(&pod)?;
        let demand = pod_resources(&pod);
        Ok(Self {
            id: TaskId::generate(),
            key,
            pod,
            demand,
            offer_id: None,
            task_info: None,
            launched: false,
            deleted: false,
            state: PodTaskState::Pending,
            executor_id,
        })
    }

    /// Acceptance predicate for incoming offers
    pub fn accepts(&self, offer: &Offer) -> bool {
        offer.resources.satisfies(&self.demand)
    }

    /// Attach an offer, synthesizing the task description for launch.
    /// The data payload stays empty until the binder fills it.
    pub fn fill_task_info(&mut self, offer: &Offer) {
        self.offer_id = Some(offer.id.clone());
        self.task_info = Some(TaskInfo {
            task_id: self.id.clone(),
            name: self.key.to_string(),
            slave_id: offer.slave_id.clone(),
            executor_id: self.executor_id.clone(),
            resources: self.demand,
            data: Vec::new(),
        });
    }

    /// Detach the offer and drop the synthesized task description
    pub fn clear_task_info(&mut self) {
        self.offer_id = None;
        self.task_info = None;
    }

    /// True once an offer has been matched and the task description built
    pub fn has_accepted_offer(&self) -> bool {
        self.offer_id.is_some() && self.task_info.is_some()
    }
}

/// Maps pod-key -> task-id and task-id -> task.
///
/// Both maps are always updated together; a key present in one without the
/// other would make tasks unreachable from either direction.
#[derive(Default)]
pub struct TaskRegistry {
    pod_to_task: HashMap<PodKey, TaskId>,
    tasks: HashMap<TaskId, PodTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task under its pod key, returning its id
    pub fn register(&mut self, task: PodTask) -> TaskId {
        let id = task.id.clone();
        self.pod_to_task.insert(task.key.clone(), id.clone());
        self.tasks.insert(id.clone(), task);
        id
    }

    /// Remove a task and its pod mapping
    pub fn unregister(&mut self, id: &TaskId) -> Option<PodTask> {
        let task = self.tasks.remove(id)?;
        self.pod_to_task.remove(&task.key);
        Some(task)
    }

    pub fn task_for_pod(&self, key: &PodKey) -> Option<TaskId> {
        self.pod_to_task.get(key).cloned()
    }

    pub fn get(&self, id: &TaskId) -> Option<&PodTask> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &TaskId) -> Option<&mut PodTask> {
        self.tasks.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
