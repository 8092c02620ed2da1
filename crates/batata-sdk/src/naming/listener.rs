//! Naming event listener trait and event types

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use batata_sdk_api::naming::{Instance, ServiceKey};

/// Event delivered to naming listeners when a service's instance list changes.
#[derive(Clone, Debug)]
pub struct NamingEvent {
    pub service_name: String,
    pub group_name: String,
    pub namespace: String,
    /// Cluster filter of the receiving subscription, comma separated
    pub clusters: String,
    pub instances: Vec<Instance>,
    /// Local snapshot revision the event was built from
    pub revision: u64,
}

impl NamingEvent {
    pub fn new(key: &ServiceKey, instances: Vec<Instance>, revision: u64) -> Self {
        Self {
            service_name: key.service_name.clone(),
            group_name: key.group_name.clone(),
            namespace: key.namespace.clone(),
            clusters: String::new(),
            instances,
            revision,
        }
    }
}

/// Trait for receiving naming service change events.
///
/// Implement this to be notified when a subscribed service's instance list
/// changes. Every event carries the full instance list, so handlers must be
/// idempotent: the resync after a reconnect may repeat a list already seen.
pub trait EventListener: Send + Sync + 'static {
    /// Called when the service's instance list has changed.
    fn on_event(&self, event: NamingEvent);
}

/// A simple listener that invokes a closure.
pub struct FnEventListener<F>
where
    F: Fn(NamingEvent) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnEventListener<F>
where
    F: Fn(NamingEvent) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventListener for FnEventListener<F>
where
    F: Fn(NamingEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: NamingEvent) {
        (self.f)(event);
    }
}

/// One subscription's listener with its cluster filter.
pub struct SubscriberEntry {
    clusters: Vec<String>,
    listener: Arc<dyn EventListener>,
    last_revision: AtomicU64,
}

impl SubscriberEntry {
    pub fn new(clusters: Vec<String>, listener: Arc<dyn EventListener>) -> Self {
        Self {
            clusters,
            listener,
            last_revision: AtomicU64::new(0),
        }
    }

    pub fn clusters(&self) -> &[String] {
        &self.clusters
    }

    /// Deliver an event, dropping revisions this subscriber already saw and
    /// instances outside its cluster filter.
    pub fn deliver(&self, event: &NamingEvent) {
        // Stored as revision + 1; zero means nothing delivered yet
        let seen = event.revision + 1;
        let previous = self.last_revision.fetch_max(seen, Ordering::SeqCst);
        if seen <= previous {
            return;
        }

        let mut event = event.clone();
        if !self.clusters.is_empty() {
            event
                .instances
                .retain(|i| self.clusters.iter().any(|c| c == &i.cluster_name));
            event.clusters = self.clusters.join(",");
        }
        self.listener.on_event(event);
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    pub(crate) key: ServiceKey,
    pub(crate) entry: Arc<SubscriberEntry>,
}

impl Subscription {
    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn clusters(&self) -> &[String] {
        self.entry.clusters()
    }
}
