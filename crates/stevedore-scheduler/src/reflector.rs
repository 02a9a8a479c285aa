use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use stevedore_core::PodKey;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ApiClient, WatchEvent, WatchEventType};
use crate::error::Result;
use crate::queue::HistoricalStore;

/// How long to wait before relisting after a watch failure
const RELIST_BACKOFF: Duration = Duration::from_secs(1);

/// Feeds the historical store from the control-plane pod watch.
///
/// Lists all pods for the initial sync, then consumes the line-delimited
/// watch stream, translating add/update/delete events into store mutations.
/// On stream failure the reflector relists and starts over.
pub struct Reflector {
    client: ApiClient,
    store: Arc<HistoricalStore>,
}

impl Reflector {
    pub fn new(client: ApiClient, store: Arc<HistoricalStore>) -> Self {
        Self { client, store }
    }

    /// Run the list-and-watch loop until cancelled
    pub async fn run(&self, token: CancellationToken) {
        info!("Starting pod reflector");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    return;
                }
                result = self.list_and_watch() => {
                    if let Err(e) = result {
                        error!(error = %e, "Pod watch failed; relisting");
                    }
                    tokio::time::sleep(RELIST_BACKOFF).await;
                }
            }
        }
    }

    async fn list_and_watch(&self) -> Result<()> {
        let list = self.client.list_pods().await?;
        let resource_version = list.resource_version.clone();

        let mut pods = Vec::with_capacity(list.items.len());
        for pod in list.items {
            match PodKey::from_pod(&pod) {
                Ok(key) => pods.push((key, pod)),
                Err(_) => warn!("Listed pod has no identity, skipping"),
            }
        }
        debug!(count = pods.len(), "Replacing store contents from list");
        self.store.replace(pods);

        let resp = self.client.watch_pods(resource_version.as_deref()).await?;
        let mut stream = resp.bytes_stream();
        let mut buffer = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| crate::error::SchedulerError::api(format!("watch stream: {}", e)))?;
            buffer.extend_from_slice(&chunk);

            // The stream is line-delimited JSON; split out complete lines
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                self.dispatch(line);
            }
        }

        Ok(())
    }

    fn dispatch(&self, line: &str) {
        let event: WatchEvent<Pod> = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Failed to decode watch event, skipping");
                return;
            }
        };

        let Ok(key) = PodKey::from_pod(&event.object) else {
            warn!("Watch event object has no identity, skipping");
            return;
        };

        debug!(pod = %key, event = ?event.event_type, "Watch event");
        match event.event_type {
            WatchEventType::Added => self.store.add(key, event.object),
            WatchEventType::Modified => self.store.update(key, event.object),
            WatchEventType::Deleted => self.store.delete(key, event.object),
            WatchEventType::Error => warn!(pod = %key, "Watch stream reported an error event"),
        }
    }
}
