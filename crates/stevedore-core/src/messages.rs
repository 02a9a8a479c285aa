use crate::resources::ResourceBundle;
use crate::types::{ExecutorId, OfferId, SlaveId, TaskId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A resource offer from a slave node, as delivered by the resource manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub slave_id: SlaveId,
    pub hostname: String,
    pub resources: ResourceBundle,
}

/// Terminal and non-terminal task states on the resource-manager wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    #[serde(rename = "TASK_STAGING")]
    Staging,
    #[serde(rename = "TASK_STARTING")]
    Starting,
    #[serde(rename = "TASK_RUNNING")]
    Running,
    #[serde(rename = "TASK_FINISHED")]
    Finished,
    #[serde(rename = "TASK_FAILED")]
    Failed,
    #[serde(rename = "TASK_KILLED")]
    Killed,
    #[serde(rename = "TASK_LOST")]
    Lost,
}

impl TaskState {
    /// True for states after which the task will never run again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Staging => "TASK_STAGING",
            TaskState::Starting => "TASK_STARTING",
            TaskState::Running => "TASK_RUNNING",
            TaskState::Finished => "TASK_FINISHED",
            TaskState::Failed => "TASK_FAILED",
            TaskState::Killed => "TASK_KILLED",
            TaskState::Lost => "TASK_LOST",
        };
        write!(f, "{}", s)
    }
}

/// Task description handed to the resource manager on launch.
///
/// `data` carries the YAML-serialized bound pod consumed by the slave-side
/// executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub name: String,
    pub slave_id: SlaveId,
    pub executor_id: ExecutorId,
    pub resources: ResourceBundle,
    pub data: Vec<u8>,
}

/// Status update flowing back from an executor to the framework
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    pub message: Option<String>,
    pub data: Vec<u8>,
}

impl TaskStatus {
    /// Build a status update with a human-readable message and no payload
    pub fn with_message(task_id: TaskId, state: TaskState, message: impl Into<String>) -> Self {
        Self {
            task_id,
            state,
            message: Some(message.into()),
            data: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Staging.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Finished.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Killed.is_terminal());
        assert!(TaskState::Lost.is_terminal());
    }

    #[test]
    fn test_task_state_display() {
        assert_eq!(TaskState::Running.to_string(), "TASK_RUNNING");
        assert_eq!(TaskState::Lost.to_string(), "TASK_LOST");
    }

    #[test]
    fn test_status_with_message() {
        let status = TaskStatus::with_message(
            TaskId::new("t-1"),
            TaskState::Failed,
            "Executor not registered yet",
        );
        assert_eq!(status.state, TaskState::Failed);
        assert_eq!(
            status.message.as_deref(),
            Some("Executor not registered yet")
        );
        assert!(status.data.is_empty());
    }
}
