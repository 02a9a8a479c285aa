use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use stevedore_core::{Offer, OfferId, PodKey, SlaveId};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Signal fired exactly once when a registered listener matches an offer.
///
/// Attached to a queued pod so the delay queue can cut a backoff delay short.
#[derive(Clone, Default)]
pub struct BreakSignal {
    inner: Arc<BreakInner>,
}

#[derive(Default)]
struct BreakInner {
    triggered: AtomicBool,
    notify: Notify,
}

impl BreakSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal; safe to call more than once
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }

    /// Wait until the signal fires; returns immediately if it already has
    pub async fn wait(&self) {
        if self.is_triggered() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

/// Predicate evaluated against newly arriving offers
pub type OfferPredicate = Box<dyn Fn(&Offer) -> bool + Send + Sync>;

struct Listener {
    pod_key: PodKey,
    predicate: OfferPredicate,
    signal: BreakSignal,
}

struct RegisteredOffer {
    offer: Arc<Offer>,
    expires_at: Instant,
    acquired: bool,
}

struct RegistryInner {
    offers: HashMap<OfferId, RegisteredOffer>,
    /// Insertion order of live offers; first-fit matching walks this
    order: Vec<OfferId>,
    /// Listeners in registration order
    listeners: Vec<Listener>,
}

/// Configuration for the offer registry
#[derive(Debug, Clone)]
pub struct OfferRegistryConfig {
    /// How long an offer stays assignable after arrival
    pub ttl: Duration,
    /// Interval between expiration sweeps
    pub sweep_interval: Duration,
}

impl Default for OfferRegistryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Tracks live resource offers from slaves.
///
/// An offer is live until it expires, is rescinded, or is consumed by a
/// launch; once non-live it can never be assigned. Listeners registered
/// against the registry fire exactly once, in registration order, when a
/// matching offer arrives; they are never fired on invalidation or expiry.
pub struct OfferRegistry {
    inner: Mutex<RegistryInner>,
    config: OfferRegistryConfig,
}

impl OfferRegistry {
    pub fn new(config: OfferRegistryConfig) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                offers: HashMap::new(),
                order: Vec::new(),
                listeners: Vec::new(),
            }),
            config,
        }
    }

    /// Insert a new offer and fire any matching listeners
    pub fn add(&self, offer: Offer) {
        let mut inner = self.inner.lock().unwrap();
        let id = offer.id.clone();
        if inner.offers.contains_key(&id) {
            debug!(offer = %id, "Ignoring duplicate offer");
            return;
        }

        let offer = Arc::new(offer);
        inner.offers.insert(
            id.clone(),
            RegisteredOffer {
                offer: offer.clone(),
                expires_at: Instant::now() + self.config.ttl,
                acquired: false,
            },
        );
        inner.order.push(id);

        // Fire matching listeners exactly once, in registration order
        let mut kept = Vec::with_capacity(inner.listeners.len());
        for listener in inner.listeners.drain(..) {
            if (listener.predicate)(&offer) {
                debug!(
                    pod = %listener.pod_key,
                    offer = %offer.id,
                    "Offer listener matched, signalling"
                );
                listener.signal.trigger();
            } else {
                kept.push(listener);
            }
        }
        inner.listeners = kept;
    }

    /// Look up a live offer by id
    pub fn get(&self, id: &OfferId) -> Option<Arc<Offer>> {
        let inner = self.inner.lock().unwrap();
        inner
            .offers
            .get(id)
            .filter(|r| r.expires_at > Instant::now())
            .map(|r| r.offer.clone())
    }

    /// Remove an offer without firing listeners
    pub fn invalidate(&self, id: &OfferId) {
        let mut inner = self.inner.lock().unwrap();
        if inner.offers.remove(id).is_some() {
            inner.order.retain(|o| o != id);
            debug!(offer = %id, "Invalidated offer");
        }
    }

    /// Remove every offer from the given slave
    pub fn invalidate_for_slave(&self, slave_id: &SlaveId) {
        let mut inner = self.inner.lock().unwrap();
        let doomed: Vec<OfferId> = inner
            .offers
            .iter()
            .filter(|(_, r)| &r.offer.slave_id == slave_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &doomed {
            inner.offers.remove(id);
        }
        inner.order.retain(|o| !doomed.contains(o));
        if !doomed.is_empty() {
            info!(slave = %slave_id, count = doomed.len(), "Invalidated offers for lost slave");
        }
    }

    /// Walk live, unacquired offers in insertion order; acquire and return the
    /// first one the predicate accepts
    pub fn acquire_matching<F>(&self, predicate: F) -> Option<Arc<Offer>>
    where
        F: Fn(&Offer) -> bool,
    {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let order = inner.order.clone();
        for id in order {
            let Some(registered) = inner.offers.get_mut(&id) else {
                continue;
            };
            if registered.acquired || registered.expires_at <= now {
                continue;
            }
            if predicate(&registered.offer) {
                registered.acquired = true;
                return Some(registered.offer.clone());
            }
        }
        None
    }

    /// Return an acquired-but-never-launched offer to the assignable pool
    pub fn release(&self, id: &OfferId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(registered) = inner.offers.get_mut(id) {
            registered.acquired = false;
            debug!(offer = %id, "Released offer");
        }
    }

    /// Register a listener for the given pod key; fires exactly once when a
    /// matching offer arrives
    pub fn listen(&self, pod_key: PodKey, predicate: OfferPredicate) -> BreakSignal {
        let signal = BreakSignal::new();
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.push(Listener {
            pod_key,
            predicate,
            signal: signal.clone(),
        });
        signal
    }

    /// Drop every offer whose TTL has elapsed
    pub fn expire_stale(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let expired: Vec<OfferId> = inner
            .offers
            .iter()
            .filter(|(_, r)| r.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            inner.offers.remove(id);
            debug!(offer = %id, "Expired offer");
        }
        inner.order.retain(|o| !expired.contains(o));
    }

    /// Number of live offers
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run periodic expiration sweeps until cancelled
    pub async fn run_expiry(&self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    return;
                }
                _ = tokio::time::sleep(self.config.sweep_interval) => {
                    self.expire_stale();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stevedore_core::ResourceBundle;

    fn offer(id: &str, slave: &str) -> Offer {
        Offer {
            id: OfferId::new(id),
            slave_id: SlaveId::new(slave),
            hostname: format!("{}.example.com", slave),
            resources: ResourceBundle::new(2.0, 1024.0),
        }
    }

    #[test]
    fn test_add_get_invalidate() {
        let registry = OfferRegistry::new(OfferRegistryConfig::default());
        registry.add(offer("o1", "s1"));

        assert!(registry.get(&OfferId::new("o1")).is_some());

        registry.invalidate(&OfferId::new("o1"));
        assert!(registry.get(&OfferId::new("o1")).is_none());
    }

    #[test]
    fn test_listener_fires_once_on_match() {
        let registry = OfferRegistry::new(OfferRegistryConfig::default());
        let signal = registry.listen(PodKey::new("default", "foo"), Box::new(|_| true));

        assert!(!signal.is_triggered());
        registry.add(offer("o1", "s1"));
        assert!(signal.is_triggered());

        // Listener is consumed; a second offer must not re-fire anything
        registry.add(offer("o2", "s2"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_listener_skipped_on_no_match() {
        let registry = OfferRegistry::new(OfferRegistryConfig::default());
        let signal = registry.listen(
            PodKey::new("default", "foo"),
            Box::new(|o| o.slave_id.as_str() == "s2"),
        );

        registry.add(offer("o1", "s1"));
        assert!(!signal.is_triggered());

        registry.add(offer("o2", "s2"));
        assert!(signal.is_triggered());
    }

    #[test]
    fn test_acquire_matching_first_fit_in_insertion_order() {
        let registry = OfferRegistry::new(OfferRegistryConfig::default());
        registry.add(offer("o1", "s1"));
        registry.add(offer("o2", "s2"));

        let first = registry.acquire_matching(|_| true).unwrap();
        assert_eq!(first.id.as_str(), "o1");

        // o1 is acquired now; the next match must skip it
        let second = registry.acquire_matching(|_| true).unwrap();
        assert_eq!(second.id.as_str(), "o2");

        assert!(registry.acquire_matching(|_| true).is_none());
    }

    #[test]
    fn test_release_returns_offer_to_pool() {
        let registry = OfferRegistry::new(OfferRegistryConfig::default());
        registry.add(offer("o1", "s1"));

        let acquired = registry.acquire_matching(|_| true).unwrap();
        assert!(registry.acquire_matching(|_| true).is_none());

        registry.release(&acquired.id);
        assert!(registry.acquire_matching(|_| true).is_some());
    }

    #[test]
    fn test_invalidate_for_slave() {
        let registry = OfferRegistry::new(OfferRegistryConfig::default());
        registry.add(offer("o1", "s1"));
        registry.add(offer("o2", "s1"));
        registry.add(offer("o3", "s2"));

        registry.invalidate_for_slave(&SlaveId::new("s1"));

        assert!(registry.get(&OfferId::new("o1")).is_none());
        assert!(registry.get(&OfferId::new("o2")).is_none());
        assert!(registry.get(&OfferId::new("o3")).is_some());
    }

    #[test]
    fn test_expire_stale() {
        let registry = OfferRegistry::new(OfferRegistryConfig {
            ttl: Duration::from_millis(0),
            sweep_interval: Duration::from_secs(30),
        });
        registry.add(offer("o1", "s1"));

        // TTL of zero: the offer is dead on arrival
        assert!(registry.get(&OfferId::new("o1")).is_none());

        registry.expire_stale();
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_break_signal_wait_after_trigger() {
        let signal = BreakSignal::new();
        signal.trigger();
        // Must not hang
        signal.wait().await;
    }
}
