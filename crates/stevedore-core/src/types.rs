use crate::error::{CoreError, Result};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use std::fmt;

/// PodKey is the scheduler's identity for a pod: `namespace/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodKey {
    /// Namespace the pod lives in
    pub namespace: String,
    /// Pod name
    pub name: String,
}

impl PodKey {
    /// Create a new PodKey
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build the key for a pod, defaulting the namespace to "default"
    pub fn from_pod(pod: &Pod) -> Result<Self> {
        let name = pod
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| CoreError::invalid_pod_key("pod has no name"))?;
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        Ok(Self::new(namespace, name))
    }

    /// Parse a `namespace/name` string
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok(Self::new(ns, name)),
            _ => Err(CoreError::invalid_pod_key(format!(
                "expected 'namespace/name', got '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for PodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

id_type! {
    /// Framework-unique identifier of a launched task
    TaskId
}

id_type! {
    /// Identifier of a resource offer
    OfferId
}

id_type! {
    /// Identifier of a slave node
    SlaveId
}

id_type! {
    /// Identifier assigned to the framework on registration
    FrameworkId
}

id_type! {
    /// Identifier of the per-slave executor
    ExecutorId
}

impl TaskId {
    /// Generate a fresh framework-unique task id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
