use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SchedulerError};

/// Bound on every non-watch control-plane request. The binder holds the
/// scheduler lock across these calls, so a stalled connection must fail
/// rather than wedge the scheduling loop.
const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A placement decision POSTed to the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    #[serde(rename = "podID")]
    pub pod_id: String,
    pub host: String,
}

/// Watch event received from the control-plane pod watch stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent<T> {
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    pub object: T,
}

/// Watch event type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Error,
}

/// List wrapper returned by the control-plane collection endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(rename = "resourceVersion", default)]
    pub resource_version: Option<String>,
}

/// The control-plane operations the scheduler consumes
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// GET a single pod
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    /// LIST services in a namespace
    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>>;

    /// POST a binding, committing a placement decision
    async fn create_binding(&self, namespace: &str, binding: &Binding) -> Result<()>;
}

/// HTTP client for the control-plane REST API
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::builder()
                .connect_timeout(API_REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(SchedulerError::api(format!(
            "{} failed with status {}: {}",
            what, status, body
        )))
    }

    /// LIST all pods across namespaces, for the reflector's initial sync
    pub async fn list_pods(&self) -> Result<ResourceList<Pod>> {
        let url = format!("{}/api/v1beta1/pods", self.base_url);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .timeout(API_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| SchedulerError::api(format!("HTTP request failed: {}", e)))?;
        let resp = Self::check(resp, "LIST pods").await?;

        resp.json::<ResourceList<Pod>>()
            .await
            .map_err(|e| SchedulerError::api(format!("Failed to parse pod list: {}", e)))
    }

    /// Open the pod watch stream at the given resource version.
    ///
    /// The stream is long-lived, so only its connect phase is bounded; the
    /// reflector handles a stalled or broken stream by relisting.
    pub async fn watch_pods(&self, resource_version: Option<&str>) -> Result<reqwest::Response> {
        let mut url = format!("{}/api/v1beta1/watch/pods", self.base_url);
        if let Some(rv) = resource_version {
            url.push_str(&format!("?resourceVersion={}", rv));
        }
        debug!("GET {} (watch)", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SchedulerError::api(format!("HTTP request failed: {}", e)))?;
        Self::check(resp, "WATCH pods").await
    }
}

#[async_trait]
impl ControlPlane for ApiClient {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let url = format!(
            "{}/api/v1beta1/pods/{}?namespace={}",
            self.base_url, name, namespace
        );
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .timeout(API_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| SchedulerError::api(format!("HTTP request failed: {}", e)))?;
        let resp = Self::check(resp, "GET pod").await?;

        resp.json::<Pod>()
            .await
            .map_err(|e| SchedulerError::api(format!("Failed to parse pod: {}", e)))
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>> {
        let url = format!(
            "{}/api/v1beta1/services?namespace={}",
            self.base_url, namespace
        );
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .timeout(API_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| SchedulerError::api(format!("HTTP request failed: {}", e)))?;
        let resp = Self::check(resp, "LIST services").await?;

        let list = resp
            .json::<ResourceList<Service>>()
            .await
            .map_err(|e| SchedulerError::api(format!("Failed to parse service list: {}", e)))?;
        Ok(list.items)
    }

    async fn create_binding(&self, namespace: &str, binding: &Binding) -> Result<()> {
        let url = format!(
            "{}/api/v1beta1/bindings?namespace={}",
            self.base_url, namespace
        );
        debug!("POST {}", url);

        let resp = self
            .client
            .post(&url)
            .timeout(API_REQUEST_TIMEOUT)
            .json(binding)
            .send()
            .await
            .map_err(|e| SchedulerError::api(format!("HTTP request failed: {}", e)))?;
        Self::check(resp, "POST binding").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_wire_shape() {
        let binding = Binding {
            pod_id: "foo".to_string(),
            host: "s1.example.com".to_string(),
        };
        let json = serde_json::to_string(&binding).unwrap();
        assert!(json.contains("\"podID\":\"foo\""));
        assert!(json.contains("\"host\":\"s1.example.com\""));
    }

    #[test]
    fn test_watch_event_wire_shape() {
        let event: WatchEvent<Pod> =
            serde_json::from_str(r#"{"type":"ADDED","object":{"metadata":{"name":"foo"}}}"#)
                .unwrap();
        assert_eq!(event.event_type, WatchEventType::Added);
        assert_eq!(event.object.metadata.name.as_deref(), Some("foo"));
    }
}
