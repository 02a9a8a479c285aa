use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use stevedore_core::PodKey;

struct BackoffEntry {
    duration: Duration,
    last_update: Instant,
}

/// Per-pod exponential backoff for scheduling retries.
///
/// The first failure waits the initial duration; each subsequent failure of
/// the same key doubles the wait up to the cap. Entries untouched for twice
/// the cap are garbage collected.
pub struct PodBackoff {
    entries: Mutex<HashMap<PodKey, BackoffEntry>>,
    initial: Duration,
    max: Duration,
}

impl Default for PodBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl PodBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            initial,
            max,
        }
    }

    /// Current delay for the key, doubling it for the next caller
    pub fn get_backoff(&self, key: &PodKey) -> Duration {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key.clone()).or_insert(BackoffEntry {
            duration: self.initial,
            last_update: Instant::now(),
        });
        let current = entry.duration;
        entry.duration = (entry.duration * 2).min(self.max);
        entry.last_update = Instant::now();
        current
    }

    /// Drop entries that have not been touched for 2x the cap
    pub fn gc(&self) {
        let cutoff = 2 * self.max;
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .retain(|_, entry| now.duration_since(entry.last_update) < cutoff);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
