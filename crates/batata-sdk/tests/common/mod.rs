//! In-memory server used by the integration tests.
//!
//! Implements `Transport` with enough config and naming semantics to drive
//! the client: md5 tracking, CAS publishes, listen contexts, versioned
//! service snapshots, per-connection subscriptions and pushes.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use batata_sdk::config::cache::compute_md5;
use batata_sdk::{BatataClient, ClientProps, ConfigInterceptor};
use batata_sdk_api::config::{
    ConfigBatchListenRequest, ConfigChangeBatchListenResponse, ConfigChangeNotifyRequest,
    ConfigContext, ConfigKey, ConfigPublishRequest, ConfigPublishResponse, ConfigQueryRequest,
    ConfigQueryResponse, ConfigRemoveRequest, ConfigRemoveResponse,
};
use batata_sdk_api::model::CONTENT_TYPE_KEY;
use batata_sdk_api::naming::{
    BATCH_REGISTER_INSTANCE, BatchInstanceRequest, BatchInstanceResponse, DE_REGISTER_INSTANCE,
    Instance, InstanceRequest, InstanceResponse, NotifySubscriberRequest, QueryServiceResponse,
    Service, ServiceKey, ServiceQueryRequest, SubscribeServiceRequest, SubscribeServiceResponse,
};
use batata_sdk_api::remote::{
    Connection, ConnectionHandle, ConnectionSetupRequest, HealthCheckResponse, Payload,
    RequestTrait, Response, ResponseTrait, Transport, TransportError,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

pub const SERVER_ADDR: &str = "127.0.0.1:8848";

#[derive(Clone)]
struct StoredConfig {
    content: String,
    md5: String,
    encrypted_data_key: String,
    content_type: String,
}

#[derive(Default)]
struct ServiceRecord {
    version: u64,
    /// (owning connection, instance)
    instances: Vec<(String, Instance)>,
}

impl ServiceRecord {
    fn to_service(&self, key: &ServiceKey) -> Service {
        let mut service = Service::new(&key.service_name, &key.group_name);
        service.version = self.version;
        service.hosts = self.instances.iter().map(|(_, i)| i.clone()).collect();
        service
    }
}

struct LiveConnection {
    alive: Arc<AtomicBool>,
    pushes: mpsc::Sender<Payload>,
    listening: HashSet<ConfigKey>,
    subscribed: HashSet<ServiceKey>,
}

#[derive(Default)]
struct ServerState {
    unreachable: bool,
    fail_heartbeats: bool,
    configs: HashMap<ConfigKey, StoredConfig>,
    corrupt_md5: HashMap<ConfigKey, String>,
    services: HashMap<ServiceKey, ServiceRecord>,
    connections: HashMap<String, LiveConnection>,
    requests: HashMap<String, usize>,
    connects: usize,
    acks: usize,
    last_setup: Option<ConnectionSetupRequest>,
    /// Request types answered only after a delay; the request is applied first
    delays: HashMap<String, Duration>,
    /// Request types rejected without being applied
    refused: HashSet<String>,
}

/// Shared handle to the in-memory server.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<ServerState>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    /// Drop every live connection as a server restart would, forgetting
    /// the instances those connections registered.
    pub fn kill_connections(&self) {
        let mut state = self.state.lock();
        let dead: Vec<String> = state.connections.keys().cloned().collect();
        for id in &dead {
            if let Some(conn) = state.connections.remove(id) {
                conn.alive.store(false, Ordering::SeqCst);
            }
        }
        for record in state.services.values_mut() {
            let before = record.instances.len();
            record.instances.retain(|(owner, _)| !dead.contains(owner));
            if record.instances.len() != before {
                record.version += 1;
            }
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    pub fn set_fail_heartbeats(&self, fail: bool) {
        self.state.lock().fail_heartbeats = fail;
    }

    /// Hold replies to `request_type` for `delay` after applying the request.
    pub fn set_response_delay(&self, request_type: &str, delay: Duration) {
        self.state
            .lock()
            .delays
            .insert(request_type.to_string(), delay);
    }

    pub fn clear_response_delay(&self, request_type: &str) {
        self.state.lock().delays.remove(request_type);
    }

    /// Reject every `request_type` request with a request-level error.
    pub fn set_refused(&self, request_type: &str, refused: bool) {
        let mut state = self.state.lock();
        if refused {
            state.refused.insert(request_type.to_string());
        } else {
            state.refused.remove(request_type);
        }
    }

    /// Change a config server-side (as another client would) and notify
    /// listening connections.
    pub fn put_config(&self, key: &ConfigKey, content: &str) {
        let mut state = self.state.lock();
        state.configs.insert(
            key.clone(),
            StoredConfig {
                content: content.to_string(),
                md5: compute_md5(content),
                encrypted_data_key: String::new(),
                content_type: "text".to_string(),
            },
        );
        state.notify_config(key);
    }

    /// Change a config server-side without pushing, as if the push was lost.
    pub fn put_config_quietly(&self, key: &ConfigKey, content: &str) {
        self.state.lock().configs.insert(
            key.clone(),
            StoredConfig {
                content: content.to_string(),
                md5: compute_md5(content),
                encrypted_data_key: String::new(),
                content_type: "text".to_string(),
            },
        );
    }

    /// Raw stored content, as the server sees it.
    pub fn stored_config(&self, key: &ConfigKey) -> Option<(String, String)> {
        self.state
            .lock()
            .configs
            .get(key)
            .map(|c| (c.content.clone(), c.encrypted_data_key.clone()))
    }

    pub fn stored_content_type(&self, key: &ConfigKey) -> Option<String> {
        self.state
            .lock()
            .configs
            .get(key)
            .map(|c| c.content_type.clone())
    }

    /// Make query responses report `md5` instead of the real one.
    pub fn corrupt_md5(&self, key: &ConfigKey, md5: &str) {
        self.state
            .lock()
            .corrupt_md5
            .insert(key.clone(), md5.to_string());
    }

    /// Send a config change push without changing anything.
    pub fn push_config_change(&self, key: &ConfigKey) {
        self.state.lock().notify_config(key);
    }

    /// Push an arbitrary service snapshot to subscribers of `key`.
    pub fn push_service(&self, key: &ServiceKey, hosts: Vec<Instance>, version: u64) {
        let mut service = Service::new(&key.service_name, &key.group_name);
        service.hosts = hosts;
        service.version = version;
        self.state.lock().notify_service(key, service);
    }

    /// Current server version of a service.
    pub fn service_version(&self, key: &ServiceKey) -> u64 {
        self.state
            .lock()
            .services
            .get(key)
            .map(|r| r.version)
            .unwrap_or(0)
    }

    pub fn server_instances(&self, key: &ServiceKey) -> Vec<Instance> {
        self.state
            .lock()
            .services
            .get(key)
            .map(|r| r.instances.iter().map(|(_, i)| i.clone()).collect())
            .unwrap_or_default()
    }

    pub fn request_count(&self, request_type: &str) -> usize {
        self.state
            .lock()
            .requests
            .get(request_type)
            .copied()
            .unwrap_or(0)
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    pub fn live_connections(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn ack_count(&self) -> usize {
        self.state.lock().acks
    }

    pub fn last_setup(&self) -> Option<ConnectionSetupRequest> {
        self.state.lock().last_setup.clone()
    }

    pub fn is_listening(&self, key: &ConfigKey) -> bool {
        self.state
            .lock()
            .connections
            .values()
            .any(|c| c.listening.contains(key))
    }

    pub fn is_subscribed(&self, key: &ServiceKey) -> bool {
        self.state
            .lock()
            .connections
            .values()
            .any(|c| c.subscribed.contains(key))
    }
}

impl ServerState {
    fn notify_config(&mut self, key: &ConfigKey) {
        let mut push = ConfigChangeNotifyRequest::for_config(key);
        push.set_request_id(uuid::Uuid::new_v4().to_string());
        let payload = push.to_payload().unwrap();
        for conn in self.connections.values() {
            if conn.listening.contains(key) {
                let _ = conn.pushes.try_send(payload.clone());
            }
        }
    }

    fn notify_service(&mut self, key: &ServiceKey, service: Service) {
        let mut push = NotifySubscriberRequest::for_service(key, service);
        push.set_request_id(uuid::Uuid::new_v4().to_string());
        let payload = push.to_payload().unwrap();
        for conn in self.connections.values() {
            if conn.subscribed.contains(key) {
                let _ = conn.pushes.try_send(payload.clone());
            }
        }
    }

    fn service_changed(&mut self, key: &ServiceKey) {
        let record = self.services.entry(key.clone()).or_default();
        record.version += 1;
        let service = record.to_service(key);
        self.notify_service(key, service);
    }

    fn upsert_instance(&mut self, key: &ServiceKey, owner: &str, instance: Instance) {
        let record = self.services.entry(key.clone()).or_default();
        match record
            .instances
            .iter_mut()
            .find(|(_, i)| i.ip == instance.ip && i.port == instance.port)
        {
            Some(existing) => *existing = (owner.to_string(), instance),
            None => record.instances.push((owner.to_string(), instance)),
        }
    }
}

fn decode<T: DeserializeOwned>(payload: &Payload) -> Result<T, TransportError> {
    payload
        .decode()
        .map_err(|e| TransportError::Request(e.to_string()))
}

fn reply<R: ResponseTrait + Serialize>(mut resp: R, request_id: String) -> Result<Payload, TransportError> {
    resp.set_request_id(request_id);
    resp.to_payload()
        .map_err(|e| TransportError::Request(e.to_string()))
}

struct MockConnection {
    id: String,
    alive: Arc<AtomicBool>,
    state: Arc<Mutex<ServerState>>,
}

impl MockConnection {
    fn handle(&self, payload: &Payload) -> Result<Payload, TransportError> {
        let mut state = self.state.lock();
        let request_type = payload.payload_type().to_string();
        *state.requests.entry(request_type.clone()).or_default() += 1;
        if state.refused.contains(&request_type) {
            return Err(TransportError::Request(format!("{} refused", request_type)));
        }

        match request_type.as_str() {
            "HealthCheckRequest" => {
                if state.fail_heartbeats {
                    return Err(TransportError::Request("health check refused".to_string()));
                }
                let req: batata_sdk_api::remote::HealthCheckRequest = decode(payload)?;
                reply(HealthCheckResponse::new(), req.request_id())
            }
            "ConfigQueryRequest" => {
                let req: ConfigQueryRequest = decode(payload)?;
                let key = req.config_request.key();
                let mut resp = ConfigQueryResponse::new();
                match state.configs.get(&key) {
                    Some(stored) => {
                        resp.content = stored.content.clone();
                        resp.md5 = state
                            .corrupt_md5
                            .get(&key)
                            .cloned()
                            .unwrap_or_else(|| stored.md5.clone());
                        resp.encrypted_data_key = stored.encrypted_data_key.clone();
                        resp.content_type = stored.content_type.clone();
                        resp.last_modified = 1_700_000_000_000;
                    }
                    None => {
                        resp.response =
                            Response::fail(ConfigQueryResponse::CONFIG_NOT_FOUND, "config not found");
                    }
                }
                reply(resp, req.request_id())
            }
            "ConfigPublishRequest" => {
                let req: ConfigPublishRequest = decode(payload)?;
                let key = req.config_request.key();
                let mut resp = ConfigPublishResponse::new();
                let current = state.configs.get(&key).map(|c| c.md5.clone());
                if !req.cas_md5.is_empty() && current.as_deref() != Some(req.cas_md5.as_str()) {
                    resp.response =
                        Response::fail(ConfigPublishResponse::CAS_CONFLICT, "cas md5 mismatch");
                    return reply(resp, req.request_id());
                }
                state.configs.insert(
                    key.clone(),
                    StoredConfig {
                        md5: compute_md5(&req.content),
                        content: req.content.clone(),
                        encrypted_data_key: req.encrypted_data_key.clone(),
                        content_type: req
                            .addition_map
                            .get(CONTENT_TYPE_KEY)
                            .cloned()
                            .unwrap_or_else(|| "text".to_string()),
                    },
                );
                state.notify_config(&key);
                reply(resp, req.request_id())
            }
            "ConfigRemoveRequest" => {
                let req: ConfigRemoveRequest = decode(payload)?;
                let key = req.config_request.key();
                if state.configs.remove(&key).is_some() {
                    state.notify_config(&key);
                }
                reply(ConfigRemoveResponse::new(), req.request_id())
            }
            "ConfigBatchListenRequest" => {
                let req: ConfigBatchListenRequest = decode(payload)?;
                let mut resp = ConfigChangeBatchListenResponse::new();
                let mut changed = Vec::new();
                for ctx in &req.config_listen_contexts {
                    let key = ctx.key();
                    let server_md5 = state
                        .configs
                        .get(&key)
                        .map(|c| c.md5.clone())
                        .unwrap_or_default();
                    if req.listen && server_md5 != ctx.md5 {
                        changed.push(ConfigContext {
                            data_id: key.data_id.clone(),
                            group: key.group.clone(),
                            tenant: key.tenant.clone(),
                        });
                    }
                }
                if let Some(conn) = state.connections.get_mut(&self.id) {
                    for ctx in &req.config_listen_contexts {
                        if req.listen {
                            conn.listening.insert(ctx.key());
                        } else {
                            conn.listening.remove(&ctx.key());
                        }
                    }
                }
                resp.changed_configs = changed;
                reply(resp, req.request_id())
            }
            "InstanceRequest" => {
                let req: InstanceRequest = decode(payload)?;
                let key = req.naming_request.key();
                if req.r#type == DE_REGISTER_INSTANCE {
                    let record = state.services.entry(key.clone()).or_default();
                    record.instances.retain(|(_, i)| {
                        !(i.ip == req.instance.ip && i.port == req.instance.port)
                    });
                } else {
                    state.upsert_instance(&key, &self.id, req.instance.clone());
                }
                state.service_changed(&key);
                reply(InstanceResponse::new(), req.request_id())
            }
            "BatchInstanceRequest" => {
                let req: BatchInstanceRequest = decode(payload)?;
                assert_eq!(req.r#type, BATCH_REGISTER_INSTANCE);
                let key = req.naming_request.key();
                for instance in &req.instances {
                    state.upsert_instance(&key, &self.id, instance.clone());
                }
                state.service_changed(&key);
                reply(BatchInstanceResponse::new(), req.request_id())
            }
            "ServiceQueryRequest" => {
                let req: ServiceQueryRequest = decode(payload)?;
                let key = req.naming_request.key();
                let service = state
                    .services
                    .get(&key)
                    .map(|r| r.to_service(&key))
                    .unwrap_or_else(|| Service::new(&key.service_name, &key.group_name));
                reply(QueryServiceResponse::new(service), req.request_id())
            }
            "SubscribeServiceRequest" => {
                let req: SubscribeServiceRequest = decode(payload)?;
                let key = req.naming_request.key();
                if let Some(conn) = state.connections.get_mut(&self.id) {
                    if req.subscribe {
                        conn.subscribed.insert(key.clone());
                    } else {
                        conn.subscribed.remove(&key);
                    }
                }
                let service = state
                    .services
                    .get(&key)
                    .map(|r| r.to_service(&key))
                    .unwrap_or_else(|| Service::new(&key.service_name, &key.group_name));
                reply(SubscribeServiceResponse::new(service), req.request_id())
            }
            other => Err(TransportError::Request(format!(
                "unsupported request type {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn request(&self, payload: Payload) -> Result<Payload, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost(self.id.clone()));
        }
        let delay = self
            .state
            .lock()
            .delays
            .get(payload.payload_type())
            .copied();
        let result = self.handle(&payload);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn reply(&self, _payload: Payload) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost(self.id.clone()));
        }
        self.state.lock().acks += 1;
        Ok(())
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.state.lock().connections.remove(&self.id);
    }
}

#[async_trait]
impl Transport for MockServer {
    async fn connect(
        &self,
        server_addr: &str,
        setup: &ConnectionSetupRequest,
    ) -> Result<ConnectionHandle, TransportError> {
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(TransportError::Unreachable(server_addr.to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let alive = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(64);
        state.connections.insert(
            id.clone(),
            LiveConnection {
                alive: alive.clone(),
                pushes: tx,
                listening: HashSet::new(),
                subscribed: HashSet::new(),
            },
        );
        state.connects += 1;
        state.last_setup = Some(setup.clone());

        Ok(ConnectionHandle {
            connection: Arc::new(MockConnection {
                id,
                alive,
                state: self.state.clone(),
            }),
            pushes: rx,
        })
    }
}

/// Props tuned for fast tests.
pub fn test_props() -> ClientProps {
    ClientProps::new(SERVER_ADDR)
        .with_app_name("integration-test")
        .with_request_timeout(Duration::from_secs(2))
        .with_connect_timeout(Duration::from_millis(500))
        .with_heartbeat(Duration::from_millis(200), Duration::from_millis(100))
        .with_reconnect_backoff(Duration::from_millis(10), Duration::from_millis(50))
        .with_config_sync_interval(Duration::from_secs(60))
}

pub async fn connect(server: &MockServer) -> BatataClient {
    connect_with(server, test_props(), None).await
}

pub async fn connect_with(
    server: &MockServer,
    props: ClientProps,
    interceptor: Option<Arc<dyn ConfigInterceptor>>,
) -> BatataClient {
    let mut builder = BatataClient::builder(props).transport(server.transport());
    if let Some(interceptor) = interceptor {
        builder = builder.interceptor(interceptor);
    }
    builder.build().await.unwrap()
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
