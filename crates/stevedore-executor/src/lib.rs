//! Stevedore Executor - the slave-side half of the two-level scheduler
//!
//! A long-running process on each worker node. Receives task-launch requests
//! carrying YAML bound pods, feeds them into the local container runtime as
//! a complete desired set, polls container state until the workload is
//! reported ready, then monitors for disappearance and reports terminal
//! status through the driver.

pub mod error;
pub mod executor;
pub mod runtime;

pub use error::{ExecutorError, Result};
pub use executor::{Executor, ExecutorConfig, ExecutorDriver};
pub use runtime::{
    network_running, ContainerInfo, MockRuntime, PodInfo, PodRuntime, PodUpdate, PodUpdateOp,
    NETWORK_CONTAINER,
};
