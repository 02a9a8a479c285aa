// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use stevedore_core::{CoreError, PodKey, TaskId};
use thiserror::Error;

/// Executor error type
#[derive(Error, Debug, Diagnostic)]
pub enum ExecutorError {
    /// A request arrived before the executor registered with its slave
    #[error("Executor is not registered with the slave")]
    #[diagnostic(
        code(executor::not_registered),
        help("The slave must register the executor before sending it work")
    )]
    NotRegistered,

    /// The referenced task is not in the executor's bookkeeping
    #[error("Unknown task {task_id}")]
    #[diagnostic(
        code(executor::unknown_task),
        help("The task was never launched here or has already been removed")
    )]
    UnknownTask {
        task_id: TaskId,
    },

    /// The task payload could not be decoded into a bound pod
    #[error("Failed to extract bound pod from task payload: {message}")]
    #[diagnostic(
        code(executor::payload_decode),
        help("The task data field must carry a YAML-serialized bound pod")
    )]
    PayloadDecode {
        message: String,
    },

    /// The container runtime has no record of the pod
    #[error("Pod {key} not found in the container runtime")]
    #[diagnostic(
        code(executor::pod_not_found),
        help("The pod may still be starting, or its containers have disappeared")
    )]
    PodNotFound {
        key: PodKey,
    },

    /// Container runtime failure
    #[error("Container runtime error: {message}")]
    #[diagnostic(
        code(executor::runtime_error),
        help("Check the local container runtime")
    )]
    Runtime {
        message: String,
    },

    /// Driver failure while sending a status update
    #[error("Failed to send status update: {message}")]
    #[diagnostic(
        code(executor::driver_error),
        help("Check the connection to the slave")
    )]
    Driver {
        message: String,
    },

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(code(executor::core_error), help("This is an internal error"))]
    Core(#[from] CoreError),
}

/// Result type for executor operations
pub type Result<T> = std::result::Result<T, ExecutorError>;

impl ExecutorError {
    /// Create a PayloadDecode error
    pub fn payload_decode(message: impl Into<String>) -> Self {
        Self::PayloadDecode {
            message: message.into(),
        }
    }

    /// Create a Runtime error
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Create a Driver error
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
        }
    }
}
