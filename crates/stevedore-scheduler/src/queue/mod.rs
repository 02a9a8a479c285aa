//! Scheduling queues: the time-delayed pod queue and the historical
//! pod-update store that feeds it.

pub mod delay;
pub mod history;

pub use delay::{DelayQueue, QueuePolicy, QueuedPod};
pub use history::{EventKind, HistoricalStore, StoreEntry};
