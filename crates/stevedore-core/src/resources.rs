use crate::error::{CoreError, Result};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};

/// CPU assumed for a container that declares no limit, in fractional cores
pub const DEFAULT_CONTAINER_CPUS: f64 = 0.25;
/// Memory assumed for a container that declares no limit, in MB
pub const DEFAULT_CONTAINER_MEM_MB: f64 = 64.0;

/// Resource vector carried by offers and task descriptions.
///
/// CPU is fractional cores, memory is megabytes - the units the resource
/// manager accounts in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceBundle {
    pub cpus: f64,
    pub mem_mb: f64,
}

impl ResourceBundle {
    pub fn new(cpus: f64, mem_mb: f64) -> Self {
        Self { cpus, mem_mb }
    }

    /// True if this bundle covers the given demand
    pub fn satisfies(&self, demand: &ResourceBundle) -> bool {
        self.cpus >= demand.cpus && self.mem_mb >= demand.mem_mb
    }
}

/// Parse a CPU quantity string (e.g. "2", "1000m", "0.5") into millicores
pub fn parse_cpu(s: &str) -> Result<i64> {
    if let Some(m) = s.strip_suffix('m') {
        // Millicores
        m.parse::<i64>()
            .map_err(|e| CoreError::invalid_quantity(s, format!("invalid millicore value: {}", e)))
    } else if let Ok(cores) = s.parse::<f64>() {
        // Cores as float
        Ok((cores * 1000.0) as i64)
    } else {
        Err(CoreError::invalid_quantity(s, "unrecognized CPU format"))
    }
}

/// Parse a memory quantity string (e.g. "128Mi", "1Gi", "1024") into bytes
pub fn parse_memory(s: &str) -> Result<i64> {
    let parse_num = |num: &str| {
        num.parse::<i64>()
            .map_err(|e| CoreError::invalid_quantity(s, e.to_string()))
    };

    if let Some(num) = s.strip_suffix("Ki") {
        Ok(parse_num(num)? * 1024)
    } else if let Some(num) = s.strip_suffix("Mi") {
        Ok(parse_num(num)? * 1024 * 1024)
    } else if let Some(num) = s.strip_suffix("Gi") {
        Ok(parse_num(num)? * 1024 * 1024 * 1024)
    } else {
        // Plain bytes
        parse_num(s)
    }
}

/// Compute the resource demand of a pod.
///
/// Sums CPU and memory limits across containers, substituting the per-container
/// defaults where a container declares none. Unparsable quantities fall back to
/// the defaults as well - a malformed limit must not make a pod unschedulable.
pub fn pod_resources(pod: &Pod) -> ResourceBundle {
    let mut demand = ResourceBundle::default();

    let containers = match &pod.spec {
        Some(spec) => &spec.containers,
        None => return demand,
    };

    for container in containers {
        let limits = container.resources.as_ref().and_then(|r| r.limits.as_ref());

        let cpus = limits
            .and_then(|l| l.get("cpu"))
            .and_then(|q| parse_cpu(&q.0).ok())
            .map(|millis| millis as f64 / 1000.0)
            .unwrap_or(DEFAULT_CONTAINER_CPUS);

        let mem_mb = limits
            .and_then(|l| l.get("memory"))
            .and_then(|q| parse_memory(&q.0).ok())
            .map(|bytes| bytes as f64 / (1024.0 * 1024.0))
            .unwrap_or(DEFAULT_CONTAINER_MEM_MB);

        demand.cpus += cpus;
        demand.mem_mb += mem_mb;
    }

    demand
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    fn container_with_limits(cpu: &str, memory: &str) -> Container {
        Container {
            name: "main".to_string(),
            resources: Some(ResourceRequirements {
                limits: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity(cpu.to_string())),
                    ("memory".to_string(), Quantity(memory.to_string())),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_cpu() {
        assert_eq!(parse_cpu("1").unwrap(), 1000);
        assert_eq!(parse_cpu("0.5").unwrap(), 500);
        assert_eq!(parse_cpu("100m").unwrap(), 100);
        assert_eq!(parse_cpu("2").unwrap(), 2000);
        assert!(parse_cpu("abc").is_err());
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory("1024").unwrap(), 1024);
        assert_eq!(parse_memory("1Ki").unwrap(), 1024);
        assert_eq!(parse_memory("128Mi").unwrap(), 128 * 1024 * 1024);
        assert_eq!(parse_memory("1Gi").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_memory("12x").is_err());
    }

    #[test]
    fn test_satisfies() {
        let offer = ResourceBundle::new(2.0, 1024.0);
        assert!(offer.satisfies(&ResourceBundle::new(1.0, 512.0)));
        assert!(offer.satisfies(&ResourceBundle::new(2.0, 1024.0)));
        assert!(!offer.satisfies(&ResourceBundle::new(2.5, 512.0)));
        assert!(!offer.satisfies(&ResourceBundle::new(1.0, 2048.0)));
    }

    #[test]
    fn test_pod_resources_defaults() {
        let mut pod = Pod::default();
        pod.spec = Some(PodSpec {
            containers: vec![Container::default(), Container::default()],
            ..Default::default()
        });

        let demand = pod_resources(&pod);
        assert_eq!(demand.cpus, 2.0 * DEFAULT_CONTAINER_CPUS);
        assert_eq!(demand.mem_mb, 2.0 * DEFAULT_CONTAINER_MEM_MB);
    }

    #[test]
    fn test_pod_resources_sums_limits() {
        let mut pod = Pod::default();
        pod.spec = Some(PodSpec {
            containers: vec![
                container_with_limits("500m", "256Mi"),
                container_with_limits("1", "128Mi"),
            ],
            ..Default::default()
        });

        let demand = pod_resources(&pod);
        assert_eq!(demand.cpus, 1.5);
        assert_eq!(demand.mem_mb, 384.0);
    }

    #[test]
    fn test_pod_resources_no_spec() {
        let demand = pod_resources(&Pod::default());
        assert_eq!(demand, ResourceBundle::default());
    }
}
