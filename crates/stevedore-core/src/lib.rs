//! Stevedore Core - Shared types for the stevedore two-level scheduler
//!
//! This crate provides:
//! - Pod and task identity types used by both halves of the framework
//! - Resource-manager wire messages (offers, task info, status updates)
//! - Resource quantity parsing and fit math
//! - Error types with miette diagnostics
//! - Payload codec helpers for the two wire formats

pub mod error;
pub mod messages;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use messages::{Offer, TaskInfo, TaskState, TaskStatus};
pub use resources::{pod_resources, ResourceBundle};
pub use types::{ExecutorId, FrameworkId, OfferId, PodKey, SlaveId, TaskId};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, Service};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Annotation key recording which config source delivered a bound pod to the
/// worker-side runtime.
pub const CONFIG_SOURCE_ANNOTATION: &str = "kubernetes.io/config.source";

// Two payloads cross the wire: a task's data field carries a YAML bound pod,
// and a TASK_RUNNING status carries a JSON pod-info map. The helpers below
// are the codec for both.

fn codec_error<E>(what: &'static str) -> impl FnOnce(E) -> CoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    move |e| CoreError::serialization_error(format!("{}: {}", what, e), Some(Box::new(e)))
}

/// Encode a status payload as JSON
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(codec_error("JSON payload encode failed"))
}

/// Encode a task payload as YAML
pub fn to_yaml<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(codec_error("YAML payload encode failed"))
}

/// Decode a task payload from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(codec_error("YAML payload decode failed"))
}
