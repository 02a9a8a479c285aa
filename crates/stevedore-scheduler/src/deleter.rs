use std::sync::Arc;

use stevedore_core::PodKey;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Result, SchedulerError};
use crate::framework::{FrameworkScheduler, SchedulerOps};
use crate::queue::{EventKind, StoreEntry};
use crate::queuer::Queuer;
use crate::task::PodTaskState;

/// Processes pod-delete events from the historical store; every other event
/// kind is forwarded to the queuer's delta signal.
pub struct Deleter {
    scheduler: Arc<FrameworkScheduler>,
    queuer: Arc<Queuer>,
}

impl Deleter {
    pub fn new(scheduler: Arc<FrameworkScheduler>, queuer: Arc<Queuer>) -> Self {
        Self { scheduler, queuer }
    }

    /// Consume store entries until cancelled
    pub async fn run(&self, mut updates: UnboundedReceiver<StoreEntry>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    return;
                }
                entry = updates.recv() => {
                    let Some(entry) = entry else {
                        return;
                    };
                    match entry.kind {
                        EventKind::Delete => {
                            if let Err(e) = self.delete_one(&entry.key).await {
                                if !matches!(e, SchedulerError::NoSuchPod) {
                                    error!(pod = %entry.key, error = %e, "Failed to process pod deletion");
                                }
                            }
                        }
                        EventKind::Pop => {}
                        _ => self.queuer.updates_available(),
                    }
                }
            }
        }
    }

    /// Unregister or kill the task backing a deleted pod.
    ///
    /// The scheduler lock is taken before the pod leaves the scheduling
    /// queue, so delete handling and error handling cannot interleave on the
    /// same pod.
    pub async fn delete_one(&self, key: &PodKey) -> Result<()> {
        debug!(pod = %key, "Pod deleted");

        let mut state = self.scheduler.state.write().await;

        // Prevent the scheduler from popping this pod; if it is concurrently
        // mid-schedule, removing the task below aborts the coming bind
        self.queuer.dequeue(key);

        let Some(task_id) = state.task_for_pod(key) else {
            debug!(pod = %key, "Could not resolve deleted pod to task id");
            return Err(SchedulerError::NoSuchPod);
        };

        let Some(task) = state.get_task_mut(&task_id) else {
            warn!(pod = %key, task = %task_id, "Cannot kill pod: task not found");
            return Err(SchedulerError::no_such_task(key.to_string()));
        };

        match task.state {
            PodTaskState::Pending if !task.launched => {
                // Invoked between Schedule and Bind: no remote state to sync
                if task.has_accepted_offer() {
                    let offer_id = task.offer_id.clone().unwrap();
                    self.scheduler.offers.release(&offer_id);
                    task.clear_task_info();
                }
                state.unregister_task(&task_id);
                Ok(())
            }
            PodTaskState::Pending | PodTaskState::Running => {
                // Signal watchers that the pod is going down, then ask the
                // executor to kill it; status updates finish the lifecycle
                task.deleted = true;
                if let Some(spec) = task.pod.spec.as_mut() {
                    spec.node_name = None;
                }
                self.scheduler.driver.kill_task(&task_id).await
            }
            PodTaskState::Finished => {
                warn!(pod = %key, task = %task_id, "Cannot kill pod: task already finished");
                Err(SchedulerError::no_such_task(key.to_string()))
            }
        }
    }
}
