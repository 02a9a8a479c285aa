use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SchedulerError};

const STATE_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Slave entry in the master's state document
#[derive(Debug, Clone, Deserialize)]
struct StateSlave {
    #[serde(default)]
    pid: String,
    #[serde(default)]
    hostname: String,
}

#[derive(Debug, Deserialize)]
struct MasterState {
    #[serde(default)]
    slaves: Vec<StateSlave>,
}

#[derive(Debug, Deserialize)]
struct StateExecutor {
    #[serde(default)]
    id: String,
    #[serde(default)]
    source: String,
}

#[derive(Debug, Deserialize)]
struct StateFramework {
    #[serde(default)]
    executors: Vec<StateExecutor>,
}

#[derive(Debug, Deserialize)]
struct SlaveState {
    #[serde(default)]
    frameworks: Vec<StateFramework>,
}

/// Client for the resource manager's HTTP state endpoint, used to discover
/// slaves and probe them for a running executor.
///
/// Every call takes a cancellation token; on cancel, the in-flight request
/// is aborted and drained before the call returns.
pub struct StateClient {
    master: String,
    client: Client,
}

impl StateClient {
    pub fn new(master: impl Into<String>) -> Self {
        Self {
            master: master.into(),
            client: Client::builder()
                .timeout(STATE_CLIENT_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Enumerate `host:port` endpoints of every slave known to the master
    pub async fn enumerate_slaves(&self, token: &CancellationToken) -> Result<Vec<String>> {
        let url = format!("http://{}/state.json", self.master);
        let state: MasterState = self.fetch_json(&url, token).await?;

        let mut hosts = Vec::new();
        for slave in state.slaves {
            if slave.pid.is_empty() {
                continue;
            }
            match parse_slave_pid(&slave.pid) {
                Some(endpoint) => hosts.push(endpoint),
                None => warn!(pid = %slave.pid, hostname = %slave.hostname, "Unparsable slave pid"),
            }
        }
        Ok(hosts)
    }

    /// The subset of slaves running an executor with the given source name
    /// and executor id
    pub async fn enlisted_slaves(
        &self,
        source: &str,
        executor_id: &str,
        token: &CancellationToken,
    ) -> Result<Vec<String>> {
        let slaves = self.enumerate_slaves(token).await?;

        let mut results = Vec::new();
        for endpoint in slaves {
            match self.slave_running_executor(&endpoint, source, executor_id, token).await {
                Ok(true) => {
                    // Strip the port; callers want hostnames
                    let host = endpoint
                        .rsplit_once(':')
                        .map(|(host, _)| host.to_string())
                        .unwrap_or(endpoint);
                    results.push(host);
                }
                Ok(false) => {}
                Err(e) => {
                    // Swallow and move on to the next slave
                    warn!(slave = %endpoint, error = %e, "Failed to probe slave for executor");
                }
            }
        }
        Ok(results)
    }

    async fn slave_running_executor(
        &self,
        endpoint: &str,
        source: &str,
        executor_id: &str,
        token: &CancellationToken,
    ) -> Result<bool> {
        let url = format!("http://{}/state.json", endpoint);
        let state: SlaveState = self.fetch_json(&url, token).await?;

        let found = state.frameworks.iter().any(|f| {
            f.executors
                .iter()
                .any(|e| e.source == source && e.id == executor_id)
        });
        Ok(found)
    }

    /// GET and decode a JSON document, honoring the cancellation token.
    /// The request runs in a spawned task so that cancellation can abort it
    /// and then drain it before returning.
    async fn fetch_json<T: serde::de::DeserializeOwned + Send + 'static>(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> Result<T> {
        debug!("GET {}", url);
        let request = self.client.get(url).send();
        let mut handle = tokio::spawn(async move {
            let resp = request
                .await
                .map_err(|e| SchedulerError::api(format!("HTTP request failed: {}", e)))?;
            if !resp.status().is_success() {
                return Err(SchedulerError::api(format!(
                    "HTTP request failed with status {}",
                    resp.status()
                )));
            }
            resp.json::<T>()
                .await
                .map_err(|e| SchedulerError::api(format!("Failed to parse state: {}", e)))
        });

        tokio::select! {
            _ = token.cancelled() => {
                handle.abort();
                let _ = handle.await;
                Err(SchedulerError::api("state request cancelled"))
            }
            result = &mut handle => {
                result.map_err(|e| SchedulerError::internal(format!("state fetch panicked: {}", e)))?
            }
        }
    }
}

/// Extract `host:port` from a slave pid like `slave(1)@10.22.211.18:5051`
pub fn parse_slave_pid(pid: &str) -> Option<String> {
    let (_, endpoint) = pid.split_once('@')?;
    if endpoint.is_empty() {
        return None;
    }
    Some(endpoint.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slave_pid() {
        assert_eq!(
            parse_slave_pid("slave(1)@10.22.211.18:5051").as_deref(),
            Some("10.22.211.18:5051")
        );
        assert!(parse_slave_pid("garbage").is_none());
        assert!(parse_slave_pid("slave(1)@").is_none());
    }

    #[test]
    fn test_master_state_decoding() {
        let state: MasterState = serde_json::from_str(
            r#"{"slaves":[{"id":"S1","pid":"slave(1)@10.0.0.1:5051","hostname":"10.0.0.1"}]}"#,
        )
        .unwrap();
        assert_eq!(state.slaves.len(), 1);
        assert_eq!(state.slaves[0].pid, "slave(1)@10.0.0.1:5051");
    }

    #[test]
    fn test_slave_state_decoding() {
        let state: SlaveState = serde_json::from_str(
            r#"{"frameworks":[{"executors":[{"id":"stevedore-executor","source":"stevedore"}]}]}"#,
        )
        .unwrap();
        assert_eq!(state.frameworks[0].executors[0].source, "stevedore");
    }

    #[tokio::test]
    async fn test_cancelled_fetch_aborts() {
        let client = StateClient::new("127.0.0.1:1");
        let token = CancellationToken::new();
        token.cancel();

        let result = client.enumerate_slaves(&token).await;
        assert!(result.is_err());
    }
}
