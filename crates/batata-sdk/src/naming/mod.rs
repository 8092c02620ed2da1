//! Service discovery (naming) store
//!
//! Provides `NamingStore` for instance registration and deregistration,
//! service queries, subscriptions and server push handling.

pub mod balancer;
pub mod failover;
pub mod listener;
pub mod service_info_holder;

use std::sync::Arc;

use batata_sdk_api::naming::{
    BatchInstanceRequest, BatchInstanceResponse, DE_REGISTER_INSTANCE, Instance, InstanceRequest,
    InstanceResponse, NotifySubscriberRequest, NotifySubscriberResponse, QueryServiceResponse,
    REGISTER_INSTANCE, Service, ServiceKey, ServiceQueryRequest, SubscribeServiceRequest,
    SubscribeServiceResponse,
};
use batata_sdk_api::remote::{Payload, RequestTrait};
use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, Result};
use crate::listener_hub::ListenerHub;
use crate::session::{ServerPushHandler, SessionManager, build_ack, decode_push};

use self::balancer::Balancer;
use self::failover::FailoverReactor;
use self::service_info_holder::{
    ApplyOutcome, ServiceInfoHolder, ServiceSnapshot, remove_instance, upsert_instance,
};

pub use self::listener::{EventListener, FnEventListener, NamingEvent, SubscriberEntry, Subscription};
pub use self::service_info_holder::SnapshotState;

const METRICS_MODULE: &str = "naming";

type NamingHub = ListenerHub<ServiceKey, SubscriberEntry, NamingEvent>;

/// Per-service instance cache with registration and subscriptions.
pub struct NamingStore {
    session: Arc<SessionManager>,
    holder: ServiceInfoHolder,
    hub: NamingHub,
    /// Instances this client registered, replayed after reconnect
    registered: DashMap<ServiceKey, Vec<Instance>>,
    /// Serializes subscribe/unsubscribe transitions per key
    key_locks: DashMap<ServiceKey, Arc<tokio::sync::Mutex<()>>>,
    failover: Option<FailoverReactor>,
}

impl NamingStore {
    /// Create the store and register its push handler on the session.
    pub fn new(session: Arc<SessionManager>) -> Arc<Self> {
        let props = session.props();
        let holder = ServiceInfoHolder::new(props.naming_push_empty_protection);
        let failover = props.naming_cache_dir.clone().map(FailoverReactor::new);

        if props.naming_load_cache_at_start
            && let Some(failover) = &failover
        {
            match failover.load_all() {
                Ok(services) => {
                    info!(
                        "Loaded {} service snapshots from {}",
                        services.len(),
                        failover.base_path().display()
                    );
                    for (key, service) in services {
                        holder.load(key, service);
                    }
                }
                Err(e) => warn!("Failed to load service snapshots: {}", e),
            }
        }

        let hub: NamingHub = ListenerHub::new(
            "naming",
            Arc::new(|entry: &SubscriberEntry, event: &NamingEvent| entry.deliver(event)),
        );

        let store = Arc::new(Self {
            session,
            holder,
            hub,
            registered: DashMap::new(),
            key_locks: DashMap::new(),
            failover,
        });

        store.session.register_push_handler(
            "NotifySubscriberRequest",
            Arc::new(NotifySubscriberHandler::new(store.clone())),
        );

        store
    }

    /// A key in the client's namespace.
    pub fn key(&self, service_name: &str, group_name: &str) -> ServiceKey {
        ServiceKey::new(service_name, group_name, self.session.namespace())
    }

    /// Register a service instance.
    ///
    /// Re-registering the same `(ip, port)` replaces its attributes.
    pub async fn register_instance(&self, key: &ServiceKey, instance: Instance) -> Result<()> {
        validate_service_key(key)?;
        validate_instance(&instance)?;

        let _: InstanceResponse = self
            .session
            .request(InstanceRequest::new(key, REGISTER_INSTANCE, instance.clone()))
            .await?;

        upsert_instance(
            &mut self.registered.entry(key.clone()).or_default(),
            instance.clone(),
        );
        let snapshot = self
            .holder
            .apply_local(key, |list| upsert_instance(list, instance));
        self.notify(snapshot);

        debug!("Registered instance for service {}", key);
        Ok(())
    }

    /// Register several instances of one service in a single request.
    pub async fn batch_register_instance(
        &self,
        key: &ServiceKey,
        instances: Vec<Instance>,
    ) -> Result<()> {
        validate_service_key(key)?;
        if instances.is_empty() {
            return Err(ClientError::InvalidArgument(
                "instances must not be empty".to_string(),
            ));
        }
        for instance in &instances {
            validate_instance(instance)?;
        }

        let _: BatchInstanceResponse = self
            .session
            .request(BatchInstanceRequest::new(key, instances.clone()))
            .await?;

        {
            let mut registered = self.registered.entry(key.clone()).or_default();
            for instance in &instances {
                upsert_instance(&mut registered, instance.clone());
            }
        }
        let count = instances.len();
        let snapshot = self.holder.apply_local(key, |list| {
            for instance in instances {
                upsert_instance(list, instance);
            }
        });
        self.notify(snapshot);

        debug!("Batch registered {} instances for service {}", count, key);
        Ok(())
    }

    /// Deregister a service instance.
    pub async fn deregister_instance(&self, key: &ServiceKey, instance: Instance) -> Result<()> {
        validate_service_key(key)?;
        validate_instance(&instance)?;

        let _: InstanceResponse = self
            .session
            .request(InstanceRequest::new(key, DE_REGISTER_INSTANCE, instance.clone()))
            .await?;

        if let Some(mut registered) = self.registered.get_mut(key) {
            remove_instance(&mut registered, &instance);
        }
        self.registered.remove_if(key, |_, list| list.is_empty());

        let snapshot = self
            .holder
            .apply_local(key, |list| remove_instance(list, &instance));
        self.notify(snapshot);

        debug!("Deregistered instance for service {}", key);
        Ok(())
    }

    /// All instances of a service, unfiltered.
    ///
    /// Served from the cache while a subscription for the key exists;
    /// otherwise a one-shot query that creates no subscription.
    pub async fn get_all_instances(&self, key: &ServiceKey) -> Result<Vec<Instance>> {
        validate_service_key(key)?;

        if self.hub.listener_count(key) > 0
            && let Some(snapshot) = self.holder.get(key)
        {
            return Ok(snapshot.instances);
        }

        match self
            .session
            .request::<_, QueryServiceResponse>(ServiceQueryRequest::new(key))
            .await
        {
            Ok(resp) => Ok(resp.service_info.hosts),
            Err(e) if e.is_connectivity() => match self.holder.get(key) {
                Some(snapshot) => {
                    debug!("Serving cached instances of {} while offline: {}", key, e);
                    Ok(snapshot.instances)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Instances of the given clusters whose health matches `healthy`.
    /// Disabled and zero-weight instances are never selected.
    pub async fn select_instances(
        &self,
        key: &ServiceKey,
        clusters: &[String],
        healthy: bool,
    ) -> Result<Vec<Instance>> {
        let instances = self.get_all_instances(key).await?;
        Ok(filter_clusters(instances, clusters)
            .into_iter()
            .filter(|i| i.healthy == healthy && i.enabled && i.weight > 0.0)
            .collect())
    }

    /// One healthy instance chosen by weighted random.
    pub async fn select_one_healthy_instance(
        &self,
        key: &ServiceKey,
        clusters: &[String],
    ) -> Result<Instance> {
        let instances = filter_clusters(self.get_all_instances(key).await?, clusters);
        Balancer::select_host(&instances).ok_or_else(|| {
            ClientError::Other(anyhow::anyhow!("no healthy instance available for {}", key))
        })
    }

    /// Subscribe to changes of a service.
    ///
    /// The first subscription of a key fetches its instances and starts a
    /// server-side watch. Every new subscription is primed with the current
    /// snapshot before receiving later updates. An empty `clusters` means
    /// all clusters. The subscriber is registered before the watch request
    /// is sent, so pushes arriving in the meantime are applied and delivered.
    pub async fn subscribe(
        &self,
        key: &ServiceKey,
        clusters: Vec<String>,
        listener: Arc<dyn EventListener>,
    ) -> Result<Subscription> {
        validate_service_key(key)?;

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let entry = Arc::new(SubscriberEntry::new(clusters, listener));
        let count = self.hub.register(key.clone(), entry.clone());

        if count == 1 {
            match self.subscribe_remote(key).await {
                Ok(()) => {}
                Err(e) if e.is_connectivity() && self.holder.contains(key) => {
                    warn!(
                        "Subscribing {} from cached snapshot, server unavailable: {}",
                        key, e
                    );
                }
                Err(e) => {
                    self.hub.unregister(key, &entry);
                    return Err(e);
                }
            }
        }

        self.session
            .metrics()
            .update_listener_count(METRICS_MODULE, &key.to_string(), count);

        if let Some(snapshot) = self.holder.get(key) {
            self.hub
                .dispatch_to(key.clone(), entry.clone(), event_of(&snapshot));
        }

        info!("Subscribed to service {}", key);
        Ok(Subscription {
            key: key.clone(),
            entry,
        })
    }

    /// Stop a subscription. The last one of a key ends the server-side
    /// watch; if that request fails the subscription stays active and the
    /// error is returned so the call can be retried.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        let key = &subscription.key;
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        if !self.hub.is_registered(key, &subscription.entry) {
            return Ok(());
        }

        if self.hub.listener_count(key) == 1 {
            let _: SubscribeServiceResponse = self
                .session
                .request(SubscribeServiceRequest::new(key, false))
                .await?;
            info!("Unsubscribed from service {}", key);
        }

        let remaining = self.hub.unregister(key, &subscription.entry).unwrap_or(0);
        self.session
            .metrics()
            .update_listener_count(METRICS_MODULE, &key.to_string(), remaining);

        Ok(())
    }

    pub fn subscriber_count(&self, key: &ServiceKey) -> usize {
        self.hub.listener_count(key)
    }

    /// The cached snapshot of a service, if any.
    pub fn snapshot(&self, key: &ServiceKey) -> Option<ServiceSnapshot> {
        self.holder.get(key)
    }

    /// Re-register all instances and re-subscribe all services (called
    /// after reconnect).
    pub async fn redo(&self) -> Result<()> {
        let registrations: Vec<(ServiceKey, Vec<Instance>)> = self
            .registered
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (key, instances) in &registrations {
            let result = if instances.len() == 1 {
                self.session
                    .request::<_, InstanceResponse>(InstanceRequest::new(
                        key,
                        REGISTER_INSTANCE,
                        instances[0].clone(),
                    ))
                    .await
                    .map(|_| ())
            } else {
                self.session
                    .request::<_, BatchInstanceResponse>(BatchInstanceRequest::new(
                        key,
                        instances.clone(),
                    ))
                    .await
                    .map(|_| ())
            };
            match result {
                Ok(()) => debug!("Re-registered {} instances of {}", instances.len(), key),
                Err(e) => error!("Failed to re-register instances of {}: {}", key, e),
            }
        }

        let subscribed = self.hub.keys();
        let results = join_all(subscribed.iter().map(|key| self.subscribe_remote(key))).await;
        for (key, result) in subscribed.iter().zip(results) {
            match result {
                Ok(()) => debug!("Re-subscribed to service {}", key),
                Err(e) => error!("Failed to re-subscribe to service {}: {}", key, e),
            }
        }

        info!(
            "Naming redo complete: {} registered services, {} subscriptions",
            registrations.len(),
            subscribed.len()
        );
        Ok(())
    }

    /// Stop listener dispatch.
    pub fn shutdown(&self) {
        self.hub.shutdown();
    }

    /// Send `subscribe=true` and store the answer. The answer is
    /// authoritative unless a snapshot was applied while it was in flight,
    /// in which case it is version gated like a push.
    async fn subscribe_remote(&self, key: &ServiceKey) -> Result<()> {
        let before = self.holder.marker(key);
        let resp: SubscribeServiceResponse = self
            .session
            .request(SubscribeServiceRequest::new(key, true))
            .await?;
        let raced = self.holder.marker(key) != before;
        self.accept_server_snapshot(key, resp.service_info, !raced);
        Ok(())
    }

    /// Handle a `NotifySubscriberRequest` from the server.
    fn handle_notify_subscriber(&self, req: NotifySubscriberRequest) {
        let key = req.key();
        if self.hub.listener_count(&key) == 0 {
            debug!("Ignoring push for unsubscribed service {}", key);
            return;
        }

        info!(
            "Service change notification: {}, version={}, hosts={}",
            key,
            req.service_info.version,
            req.service_info.hosts.len()
        );
        self.accept_server_snapshot(&key, req.service_info, false);
    }

    fn accept_server_snapshot(&self, key: &ServiceKey, service: Service, force: bool) {
        let version = service.version;
        let persisted = self.failover.is_some().then(|| service.clone());

        match self.holder.apply_server(key, service, force) {
            ApplyOutcome::Accepted { snapshot, changed } => {
                if changed {
                    self.notify(snapshot);
                }
                if let Some(service) = persisted {
                    self.persist(key, service);
                }
            }
            ApplyOutcome::Stale { cached_version } => warn!(
                "Discarding stale snapshot of {}: version {} <= {}",
                key, version, cached_version
            ),
            ApplyOutcome::EmptyProtected => warn!(
                "Ignoring empty instance list for {} at version {}, keeping cached instances",
                key, version
            ),
        }
    }

    fn notify(&self, snapshot: ServiceSnapshot) {
        if self.hub.listener_count(&snapshot.key) > 0 {
            let event = event_of(&snapshot);
            self.hub.dispatch(snapshot.key, event);
        }
    }

    fn persist(&self, key: &ServiceKey, service: Service) {
        let Some(failover) = &self.failover else {
            return;
        };
        if let Err(e) = failover.save(key, &service) {
            warn!("Failed to save snapshot of {}: {}", key, e);
        }
    }

    fn key_lock(&self, key: &ServiceKey) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks.entry(key.clone()).or_default().clone()
    }
}

fn event_of(snapshot: &ServiceSnapshot) -> NamingEvent {
    NamingEvent::new(&snapshot.key, snapshot.instances.clone(), snapshot.revision)
}

fn filter_clusters(instances: Vec<Instance>, clusters: &[String]) -> Vec<Instance> {
    if clusters.is_empty() {
        return instances;
    }
    instances
        .into_iter()
        .filter(|i| clusters.iter().any(|c| c == &i.cluster_name))
        .collect()
}

fn validate_service_key(key: &ServiceKey) -> Result<()> {
    if key.service_name.trim().is_empty() {
        return Err(ClientError::InvalidArgument(
            "serviceName must not be empty".to_string(),
        ));
    }
    if key.group_name.trim().is_empty() {
        return Err(ClientError::InvalidArgument(
            "groupName must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_instance(instance: &Instance) -> Result<()> {
    if instance.ip.trim().is_empty() {
        return Err(ClientError::InvalidArgument("ip must not be empty".to_string()));
    }
    if !(1..=65535).contains(&instance.port) {
        return Err(ClientError::InvalidArgument(format!(
            "port {} out of range 1-65535",
            instance.port
        )));
    }
    if !instance.weight.is_finite() || instance.weight < 0.0 {
        return Err(ClientError::InvalidArgument(format!(
            "weight {} must be a non-negative number",
            instance.weight
        )));
    }
    Ok(())
}

/// Server push handler for `NotifySubscriberRequest`.
pub struct NotifySubscriberHandler {
    naming_store: Arc<NamingStore>,
}

impl NotifySubscriberHandler {
    pub fn new(naming_store: Arc<NamingStore>) -> Self {
        Self { naming_store }
    }
}

impl ServerPushHandler for NotifySubscriberHandler {
    fn handle(&self, payload: &Payload) -> Option<Payload> {
        let req: NotifySubscriberRequest = decode_push(payload)?;
        let request_id = req.request_id();
        self.naming_store.handle_notify_subscriber(req);

        build_ack(NotifySubscriberResponse::new(), request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_instance() {
        assert!(validate_instance(&Instance::new("127.0.0.1", 8080)).is_ok());
        assert!(validate_instance(&Instance::new("127.0.0.1", 65535).with_weight(0.0)).is_ok());

        for bad in [
            Instance::new("127.0.0.1", 0),
            Instance::new("127.0.0.1", 65536),
            Instance::new("127.0.0.1", -1),
            Instance::new("", 8080),
            Instance::new("127.0.0.1", 8080).with_weight(-1.0),
            Instance::new("127.0.0.1", 8080).with_weight(f64::NAN),
        ] {
            assert!(
                matches!(validate_instance(&bad), Err(ClientError::InvalidArgument(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_validate_service_key() {
        assert!(validate_service_key(&ServiceKey::new("svc", "G", "")).is_ok());
        assert!(validate_service_key(&ServiceKey::new("", "G", "")).is_err());
        assert!(validate_service_key(&ServiceKey::new("svc", "", "")).is_err());
    }

    #[test]
    fn test_filter_clusters() {
        let instances = vec![
            Instance::new("10.0.0.1", 80).with_cluster("east"),
            Instance::new("10.0.0.2", 80),
        ];
        assert_eq!(filter_clusters(instances.clone(), &[]).len(), 2);

        let east = filter_clusters(instances, &["east".to_string()]);
        assert_eq!(east.len(), 1);
        assert_eq!(east[0].ip, "10.0.0.1");
    }
}
