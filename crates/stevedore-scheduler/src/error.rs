// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use stevedore_core::{CoreError, SlaveId, TaskId};
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// Pod has no task mapping; callers drop this silently
    #[error("No such pod")]
    #[diagnostic(
        code(scheduler::no_such_pod),
        help("The pod was deleted or never registered; nothing to do")
    )]
    NoSuchPod,

    /// No live offer satisfies the task's resource demand
    #[error("No suitable offers for pod {pod}")]
    #[diagnostic(
        code(scheduler::no_suitable_offers),
        help("Check slave resources and the pod's container limits")
    )]
    NoSuitableOffers {
        pod: String,
    },

    /// Chosen offer was rescinded or timed out before bind
    #[error("Offer expired before launch of task {task_id}")]
    #[diagnostic(
        code(scheduler::offer_expired),
        help("The task stays pending; the error handler will retry with backoff")
    )]
    OfferExpired {
        task_id: TaskId,
    },

    /// Chosen offer's slave is no longer known
    #[error("Slave {slave_id} disappeared while scheduling task {task_id}")]
    #[diagnostic(
        code(scheduler::slave_disappeared),
        help("The slave's offers have been invalidated; the task will be rescheduled")
    )]
    SlaveDisappeared {
        slave_id: SlaveId,
        task_id: TaskId,
    },

    /// Delete requested for a pod with no task record
    #[error("No task found for pod {pod}")]
    #[diagnostic(
        code(scheduler::no_such_task),
        help("The task already reached a terminal state or was never created")
    )]
    NoSuchTask {
        pod: String,
    },

    /// Task exists but is not in a schedulable state
    #[error("Task {task_id} is not pending, nothing to schedule")]
    #[diagnostic(
        code(scheduler::not_pending),
        help("Only pending, unlaunched tasks may be scheduled")
    )]
    NotPending {
        task_id: TaskId,
    },

    /// Task has already been handed to the resource manager
    #[error("Task {task_id} has already been launched, aborting schedule")]
    #[diagnostic(
        code(scheduler::already_launched),
        help("A launched task must fail or finish before it can be scheduled again")
    )]
    AlreadyLaunched {
        task_id: TaskId,
    },

    /// Control-plane transport failure
    #[error("Control plane request failed: {message}")]
    #[diagnostic(
        code(scheduler::api_error),
        help("Check that the control-plane API server is reachable")
    )]
    Api {
        message: String,
    },

    /// Resource-manager driver failure
    #[error("Driver call failed: {message}")]
    #[diagnostic(
        code(scheduler::driver_error),
        help("Check the resource-manager master connection")
    )]
    Driver {
        message: String,
    },

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(code(scheduler::core_error), help("This is an internal error"))]
    Core(#[from] CoreError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    Internal {
        message: String,
    },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create a NoSuitableOffers error
    pub fn no_suitable_offers(pod: impl Into<String>) -> Self {
        Self::NoSuitableOffers { pod: pod.into() }
    }

    /// Create a NoSuchTask error
    pub fn no_such_task(pod: impl Into<String>) -> Self {
        Self::NoSuchTask { pod: pod.into() }
    }

    /// Create an Api error
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
        }
    }

    /// Create a Driver error
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
        }
    }

    /// Create an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
