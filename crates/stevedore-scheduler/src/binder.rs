use std::sync::Arc;

use k8s_openapi::api::core::v1::{EnvVar, Pod, Service};
use stevedore_core::{to_yaml, PodKey, TaskId, CONFIG_SOURCE_ANNOTATION};
use tracing::{debug, info};

use crate::client::{Binding, ControlPlane};
use crate::error::{Result, SchedulerError};
use crate::framework::{FrameworkScheduler, SchedulerOps};
use crate::task::PodTaskState;

/// Annotation carrying the stable reference to a bound pod
pub const SELF_LINK_ANNOTATION: &str = "stevedore.io/self-link";

/// Commits a placement decision: POSTs the binding to the control plane and
/// launches the task through the driver.
pub struct Binder {
    scheduler: Arc<FrameworkScheduler>,
    client: Arc<dyn ControlPlane>,
    /// Config source stamped into each bound pod for the worker-side runtime
    source_name: String,
}

impl Binder {
    pub fn new(
        scheduler: Arc<FrameworkScheduler>,
        client: Arc<dyn ControlPlane>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            scheduler,
            client,
            source_name: source_name.into(),
        }
    }

    /// Bind the pod to the chosen host and launch its task.
    ///
    /// Holds the scheduler lock across the control-plane POST and the driver
    /// launch: these are the decisive operations and the scheduler is
    /// single-dispatch.
    pub async fn bind(&self, pod: &Pod, host: &str) -> Result<()> {
        let key = PodKey::from_pod(pod)?;

        let mut state = self.scheduler.state.write().await;

        let Some(task_id) = state.task_for_pod(&key) else {
            info!(pod = %key, "Could not resolve pod to task id");
            return Err(SchedulerError::NoSuchPod);
        };

        let task_state = state
            .get_task(&task_id)
            .map(|t| t.state)
            .ok_or_else(|| SchedulerError::internal("task map out of sync"))?;
        if task_state != PodTaskState::Pending {
            // Likely deleted between Schedule and Bind
            info!(pod = %key, "No pending task for pod");
            return Err(SchedulerError::NoSuchPod);
        }

        match self.bind_task(&mut *state, &task_id, &key, host).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // Leave the task pending with no offer so the error handler
                // can retry
                if let Some(task) = state.get_task_mut(&task_id) {
                    if let Some(offer_id) = task.offer_id.clone() {
                        self.scheduler.offers.release(&offer_id);
                    }
                    task.clear_task_info();
                }
                Err(err)
            }
        }
    }

    /// The part of bind that can fail after offer acceptance. The caller
    /// owns releasing the offer on error.
    async fn bind_task<S: SchedulerOps>(
        &self,
        state: &mut S,
        task_id: &TaskId,
        key: &PodKey,
        host: &str,
    ) -> Result<()> {
        // Sanity check: between Schedule and now the offer for this task may
        // have been rescinded or invalidated
        let offer_id = {
            let task = state
                .get_task(task_id)
                .ok_or_else(|| SchedulerError::internal("task map out of sync"))?;
            if !task.has_accepted_offer() {
                return Err(SchedulerError::internal(format!(
                    "task has not accepted a valid offer {}",
                    task_id
                )));
            }
            task.offer_id.clone().unwrap()
        };

        if self.scheduler.offers.get(&offer_id).is_none() {
            return Err(SchedulerError::OfferExpired {
                task_id: task_id.clone(),
            });
        }

        let payload = self.prepare_task_for_launch(key).await?;

        debug!(pod = %key, host = %host, "Attempting to bind pod to host");
        self.client
            .create_binding(
                &key.namespace,
                &Binding {
                    pod_id: key.name.clone(),
                    host: host.to_string(),
                },
            )
            .await?;

        let task_info = {
            let task = state
                .get_task_mut(task_id)
                .ok_or_else(|| SchedulerError::internal("task map out of sync"))?;
            let info = task
                .task_info
                .as_mut()
                .ok_or_else(|| SchedulerError::internal("task info vanished before launch"))?;
            info.data = payload;
            info.clone()
        };

        debug!(task = %task_id, "Launching task");
        self.scheduler
            .driver
            .launch_tasks(&offer_id, &[task_info])
            .await?;

        // The offer is consumed; make sure it can never be assigned again
        // before the scheduler lock is released
        self.scheduler.offers.invalidate(&offer_id);

        if let Some(task) = state.get_task_mut(task_id) {
            if let Some(spec) = task.pod.spec.as_mut() {
                spec.node_name = Some(host.to_string());
            }
            task.launched = true;
        }

        info!(pod = %key, host = %host, task = %task_id, "Launched pod task");
        Ok(())
    }

    /// Build the bound-pod payload: the current pod from the control plane
    /// with service environment variables attached to every container and a
    /// stable self-link, serialized as YAML.
    async fn prepare_task_for_launch(&self, key: &PodKey) -> Result<Vec<u8>> {
        let mut bound_pod = self.client.get_pod(&key.namespace, &key.name).await?;

        let services = self.client.list_services(&key.namespace).await?;
        let env_vars = service_env_vars(&services);

        if let Some(spec) = bound_pod.spec.as_mut() {
            for container in spec.containers.iter_mut() {
                container
                    .env
                    .get_or_insert_with(Vec::new)
                    .extend(env_vars.iter().cloned());
            }
        }

        let annotations = bound_pod.metadata.annotations.get_or_insert_with(Default::default);
        annotations.insert(
            SELF_LINK_ANNOTATION.to_string(),
            format!("/api/v1beta1/boundPods/{}", key.name),
        );
        annotations.insert(
            CONFIG_SOURCE_ANNOTATION.to_string(),
            self.source_name.clone(),
        );

        Ok(to_yaml(&bound_pod)?.into_bytes())
    }
}

/// Environment variables granting containers access to services, in the
/// classic `{NAME}_SERVICE_HOST` / docker-links shape.
pub fn service_env_vars(services: &[Service]) -> Vec<EnvVar> {
    let mut vars = Vec::new();

    for service in services {
        let Some(name) = service.metadata.name.as_deref() else {
            continue;
        };
        let Some(spec) = service.spec.as_ref() else {
            continue;
        };
        let Some(ip) = spec.cluster_ip.as_deref().filter(|ip| *ip != "None") else {
            continue;
        };
        let Some(port) = spec.ports.as_ref().and_then(|p| p.first()) else {
            continue;
        };

        let env_name = name.to_uppercase().replace('-', "_");
        let proto = port
            .protocol
            .as_deref()
            .unwrap_or("TCP")
            .to_lowercase();

        let make = |suffix: &str, value: String| EnvVar {
            name: format!("{}_{}", env_name, suffix),
            value: Some(value),
            value_from: None,
        };

        vars.push(make("SERVICE_HOST", ip.to_string()));
        vars.push(make("SERVICE_PORT", port.port.to_string()));
        vars.push(make("PORT", format!("{}://{}:{}", proto, ip, port.port)));
        let prefix = format!("PORT_{}_{}", port.port, proto.to_uppercase());
        vars.push(make(&prefix, format!("{}://{}:{}", proto, ip, port.port)));
        vars.push(make(&format!("{}_PROTO", prefix), proto.clone()));
        vars.push(make(&format!("{}_PORT", prefix), port.port.to_string()));
        vars.push(make(&format!("{}_ADDR", prefix), ip.to_string()));
    }

    vars
}
