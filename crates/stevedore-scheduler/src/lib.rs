//! Stevedore Scheduler - the framework half of the two-level scheduler
//!
//! Receives resource offers from the resource manager, matches pending pod
//! tasks to offers, commits placements via the control-plane binding API, and
//! launches tasks through the driver. Failed attempts are retried off a
//! time-delayed queue with exponential backoff and offer-arrival wakeups.
//!
//! Data flow: reflector -> historical store -> queuer -> delay queue ->
//! algorithm -> binder -> driver launch; status updates flow back through the
//! driver callbacks into the task store.

pub mod algorithm;
pub mod backoff;
pub mod binder;
pub mod client;
pub mod cloud;
pub mod deleter;
pub mod error;
pub mod error_handler;
pub mod framework;
pub mod offers;
pub mod plugin;
pub mod queue;
pub mod queuer;
pub mod reflector;
pub mod task;

pub use algorithm::Algorithm;
pub use backoff::PodBackoff;
pub use binder::Binder;
pub use client::{ApiClient, Binding, ControlPlane};
pub use cloud::StateClient;
pub use deleter::Deleter;
pub use error::{Result, SchedulerError};
pub use error_handler::ErrorHandler;
pub use framework::{FrameworkScheduler, SchedulerDriver, SchedulerOps, SchedulerState, Slave};
pub use offers::{BreakSignal, OfferRegistry, OfferRegistryConfig};
pub use plugin::SchedulerPlugin;
pub use queue::{DelayQueue, EventKind, HistoricalStore, QueuePolicy, QueuedPod, StoreEntry};
pub use queuer::Queuer;
pub use reflector::Reflector;
pub use task::{PodTask, PodTaskState, TaskRegistry};
