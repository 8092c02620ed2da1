//! Session management
//!
//! `SessionManager` owns the single logical connection of a client: it
//! connects round-robin over the server list, keeps the connection alive
//! with heartbeats, answers built-in server pushes, routes the rest to the
//! push handlers registered by the stores and transparently reconnects with
//! exponential backoff, replaying client state afterwards.

pub mod backoff;
pub mod state;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use batata_sdk_api::model::{
    ACCESS_TOKEN, APPNAME, CLIENT_VERSION, CLIENT_VERSION_KEY, LABEL_MODULE, LABEL_MODULE_CONFIG,
    LABEL_MODULE_NAMING, LABEL_SOURCE, LABEL_SOURCE_SDK,
};
use batata_sdk_api::remote::{
    ClientDetectionRequest, ClientDetectionResponse, Connection, ConnectResetRequest,
    ConnectResetResponse, ConnectionSetupRequest, HealthCheckRequest, HealthCheckResponse,
    Payload, RequestTrait, ResponseTrait, Transport, TransportError,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::CredentialProvider;
use crate::error::{ClientError, Result};
use crate::metrics::{MetricsMonitor, Timer};
use crate::props::ClientProps;
use crate::redo::RedoService;

use self::backoff::Backoff;
pub use self::state::SessionState;

/// Handler trait for server push messages.
pub trait ServerPushHandler: Send + Sync + 'static {
    /// Handle a server push payload and optionally return an acknowledgment.
    fn handle(&self, payload: &Payload) -> Option<Payload>;
}

/// Decode a server push body, logging and dropping undecodable payloads.
pub fn decode_push<T: DeserializeOwned>(payload: &Payload) -> Option<T> {
    match payload.decode::<T>() {
        Ok(v) => Some(v),
        Err(e) => {
            error!(
                payload_type = %payload.payload_type(),
                error = %e,
                "Failed to deserialize server push"
            );
            None
        }
    }
}

/// Build an acknowledgment payload echoing the push's request id.
pub fn build_ack<R>(mut resp: R, request_id: String) -> Option<Payload>
where
    R: ResponseTrait + Serialize,
{
    resp.set_request_id(request_id);
    match resp.to_payload() {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!("Failed to encode push acknowledgment: {}", e);
            None
        }
    }
}

enum Control {
    Lost {
        connection_id: String,
        reason: String,
    },
    Reset {
        target: Option<String>,
    },
}

enum Exit {
    Lost(String),
    Reset(Option<String>),
    Stopped,
}

/// One persistent, self-healing session to the server cluster.
pub struct SessionManager {
    props: ClientProps,
    server_addrs: Vec<String>,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    metrics: Arc<MetricsMonitor>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    state_tx: watch::Sender<SessionState>,
    push_handlers: DashMap<String, Arc<dyn ServerPushHandler>>,
    redo: RwLock<Option<Arc<RedoService>>>,
    current_server_index: AtomicUsize,
    control_tx: mpsc::UnboundedSender<Control>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Connect to the first responsive server and start the supervisor.
    ///
    /// Fails with `ConnectionError` when no server accepts a connection
    /// within `connect_timeout`.
    pub async fn connect(
        props: ClientProps,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
        metrics: Arc<MetricsMonitor>,
    ) -> Result<Arc<Self>> {
        props.validate()?;

        let (state_tx, _) = watch::channel(SessionState::Connecting);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let session = Arc::new(Self {
            server_addrs: props.server_addrs(),
            props,
            transport,
            credentials,
            metrics,
            connection: RwLock::new(None),
            state_tx,
            push_handlers: DashMap::new(),
            redo: RwLock::new(None),
            current_server_index: AtomicUsize::new(0),
            control_tx,
            supervisor: Mutex::new(None),
        });

        let pushes = match session.establish(None).await {
            Ok(pushes) => pushes,
            Err(e) => {
                session.state_tx.send_replace(SessionState::Closed);
                return Err(e);
            }
        };

        let task = tokio::spawn(session.clone().supervise(pushes, control_rx));
        *session.supervisor.lock() = Some(task);

        Ok(session)
    }

    pub fn props(&self) -> &ClientProps {
        &self.props
    }

    pub fn namespace(&self) -> &str {
        &self.props.namespace
    }

    pub fn metrics(&self) -> &Arc<MetricsMonitor> {
        &self.metrics
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch session state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Wait until the session reaches `state`, up to `timeout`.
    pub async fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        let mut rx = self.subscribe_state();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == state))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Id of the live connection, if any.
    pub fn connection_id(&self) -> Option<String> {
        self.current_connection()
            .map(|c| c.connection_id().to_string())
    }

    /// Register a handler for server push messages of the given type.
    pub fn register_push_handler(&self, type_name: &str, handler: Arc<dyn ServerPushHandler>) {
        self.push_handlers.insert(type_name.to_string(), handler);
    }

    /// Install the state replayer run after every reconnect.
    pub fn set_redo(&self, redo: Arc<RedoService>) {
        *self.redo.write() = Some(redo);
    }

    /// Ask the supervisor to drop the connection and reconnect.
    pub fn reconnect(&self) {
        let _ = self.control_tx.send(Control::Reset { target: None });
    }

    /// Send a typed request and decode its response.
    ///
    /// Fails fast with `SessionUnavailable` unless the session is connected,
    /// and with `Timeout` when no response arrives within the request
    /// timeout. A non-success response becomes `ServerError`.
    pub async fn request<Req, Resp>(&self, mut req: Req) -> Result<Resp>
    where
        Req: RequestTrait + Serialize + Send,
        Resp: DeserializeOwned + ResponseTrait,
    {
        match self.state() {
            SessionState::Connected => {}
            SessionState::Closed => return Err(ClientError::Closed),
            _ => return Err(ClientError::SessionUnavailable),
        }
        let connection = self
            .current_connection()
            .ok_or(ClientError::SessionUnavailable)?;

        req.set_request_id(Uuid::new_v4().to_string());
        req.insert_headers(self.request_headers().await?);
        let payload = req.to_payload()?;

        let operation = req.request_type();
        let timer = Timer::start(&self.metrics, operation);
        debug!("Sending {} on connection {}", operation, connection.connection_id());

        let response = match tokio::time::timeout(
            self.props.request_timeout(),
            connection.request(payload),
        )
        .await
        {
            Err(_) => {
                timer.failure("timeout");
                return Err(ClientError::Timeout);
            }
            Ok(Err(e)) => {
                timer.failure("transport");
                if e.is_connection_level() {
                    self.report_lost(connection.connection_id(), e.to_string());
                }
                return Err(e.into());
            }
            Ok(Ok(response)) => response,
        };

        let resp: Resp = response.decode()?;
        if !resp.is_success() {
            timer.failure("server");
            return Err(ClientError::ServerError {
                code: resp.error_code(),
                message: resp.message(),
            });
        }

        timer.success();
        Ok(resp)
    }

    /// Close the session for good and release the connection.
    pub async fn shutdown(&self) {
        if let Some(connection) = self.close() {
            connection.close().await;
        }
    }

    /// Synchronous variant of [`shutdown`](Self::shutdown) for drop paths;
    /// the connection is closed on the runtime if one is available.
    pub fn shutdown_now(&self) {
        if let Some(connection) = self.close()
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            handle.spawn(async move { connection.close().await });
        }
    }

    fn close(&self) -> Option<Arc<dyn Connection>> {
        let previous = self.state_tx.send_replace(SessionState::Closed);
        if previous.is_closed() {
            return None;
        }

        if let Some(task) = self.supervisor.lock().take() {
            task.abort();
        }
        self.push_handlers.clear();
        self.redo.write().take();

        info!("Session closed");
        self.connection.write().take()
    }

    fn current_connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.read().clone()
    }

    fn set_state(&self, next: SessionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if current.is_closed() || *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!("Session state -> {}", next);
        }
    }

    fn report_lost(&self, connection_id: &str, reason: String) {
        if self.connection_id().as_deref() == Some(connection_id) {
            self.set_state(SessionState::Disconnected);
        }
        let _ = self.control_tx.send(Control::Lost {
            connection_id: connection_id.to_string(),
            reason,
        });
    }

    async fn request_headers(&self) -> Result<HashMap<String, String>> {
        let mut headers = HashMap::new();
        headers.insert(APPNAME.to_string(), self.props.app_name.clone());
        headers.insert(CLIENT_VERSION_KEY.to_string(), CLIENT_VERSION.to_string());
        if let Some(token) = self.credentials.token().await? {
            headers.insert(ACCESS_TOKEN.to_string(), token);
        }
        Ok(headers)
    }

    async fn setup_request(&self) -> Result<ConnectionSetupRequest> {
        let mut labels = self.props.labels.clone();
        labels.insert(LABEL_SOURCE.to_string(), LABEL_SOURCE_SDK.to_string());
        labels.insert(
            LABEL_MODULE.to_string(),
            format!("{},{}", LABEL_MODULE_CONFIG, LABEL_MODULE_NAMING),
        );
        labels.insert(APPNAME.to_string(), self.props.app_name.clone());

        let mut setup = ConnectionSetupRequest::new();
        setup.client_version = CLIENT_VERSION.to_string();
        setup.tenant = self.props.namespace.clone();
        setup.labels = labels;
        setup.set_request_id(Uuid::new_v4().to_string());
        setup.insert_headers(self.request_headers().await?);
        Ok(setup)
    }

    /// Connection candidates: the explicit target first, then the server
    /// list rotated to start at the current index.
    fn candidates(&self, target: Option<String>) -> Vec<(Option<usize>, String)> {
        let len = self.server_addrs.len();
        let start = self.current_server_index.load(Ordering::Relaxed);

        let mut candidates: Vec<(Option<usize>, String)> =
            target.into_iter().map(|t| (None, t)).collect();
        candidates.extend((0..len).map(|offset| {
            let index = (start + offset) % len;
            (Some(index), self.server_addrs[index].clone())
        }));
        candidates
    }

    /// Open a connection and make it current. Returns its push stream.
    async fn establish(&self, target: Option<String>) -> Result<mpsc::Receiver<Payload>> {
        self.set_state(SessionState::Connecting);
        let setup = self.setup_request().await?;
        let candidates = self.candidates(target);

        let attempt = async {
            let mut last_error = None;
            for (index, addr) in candidates {
                match self.transport.connect(&addr, &setup).await {
                    Ok(handle) => return Ok((index, addr, handle)),
                    Err(e) => {
                        warn!("Failed to connect to {}: {}", addr, e);
                        if let Some(index) = index {
                            self.current_server_index
                                .store(index + 1, Ordering::Relaxed);
                        }
                        last_error = Some(e);
                    }
                }
            }
            Err(last_error)
        };

        let (index, addr, handle) =
            match tokio::time::timeout(self.props.connect_timeout(), attempt).await {
                Err(_) => {
                    self.set_state(SessionState::Disconnected);
                    return Err(ClientError::ConnectionError(format!(
                        "no server responded within {:?}",
                        self.props.connect_timeout()
                    )));
                }
                Ok(Err(last_error)) => {
                    self.set_state(SessionState::Disconnected);
                    return Err(ClientError::ConnectionError(
                        last_error
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "no server address configured".to_string()),
                    ));
                }
                Ok(Ok(connected)) => connected,
            };

        if let Some(index) = index {
            self.current_server_index.store(index, Ordering::Relaxed);
        }

        info!(
            "Connected to server {}, connection_id={}",
            addr,
            handle.connection.connection_id()
        );

        let previous = self.connection.write().replace(handle.connection);
        if let Some(previous) = previous {
            previous.close().await;
        }
        self.set_state(SessionState::Connected);

        Ok(handle.pushes)
    }

    async fn drop_connection(&self) {
        let previous = self.connection.write().take();
        if let Some(previous) = previous {
            previous.close().await;
        }
    }

    async fn supervise(
        self: Arc<Self>,
        mut pushes: mpsc::Receiver<Payload>,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
    ) {
        loop {
            let mut target = match self.run_connected(&mut pushes, &mut control_rx).await {
                Exit::Stopped => break,
                Exit::Lost(reason) => {
                    warn!("Connection lost: {}", reason);
                    None
                }
                Exit::Reset(target) => {
                    info!("Connection reset requested, target={:?}", target);
                    target
                }
            };

            self.drop_connection().await;
            self.set_state(SessionState::Disconnected);

            let mut backoff = Backoff::new(
                Duration::from_millis(self.props.reconnect_initial_backoff_ms),
                Duration::from_millis(self.props.reconnect_max_backoff_ms),
            );

            pushes = loop {
                if self.state().is_closed() {
                    return;
                }
                if let Err(e) = self.credentials.refresh().await {
                    warn!("Credential refresh before reconnect failed: {}", e);
                }
                match self.establish(target.take()).await {
                    Ok(pushes) => break pushes,
                    Err(e) => {
                        let delay = backoff.next_delay();
                        warn!("Reconnect failed: {}, retrying in {:?}", e, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            };

            self.metrics.increment_reconnect();
            self.spawn_redo();
        }

        debug!("Session supervisor ended");
    }

    async fn run_connected(
        &self,
        pushes: &mut mpsc::Receiver<Payload>,
        control_rx: &mut mpsc::UnboundedReceiver<Control>,
    ) -> Exit {
        let connection_id = self.connection_id().unwrap_or_default();
        let interval = self.props.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut missed = 0u32;

        loop {
            tokio::select! {
                control = control_rx.recv() => match control {
                    None => return Exit::Stopped,
                    Some(Control::Lost { connection_id: id, reason }) => {
                        if id == connection_id {
                            return Exit::Lost(reason);
                        }
                    }
                    Some(Control::Reset { target }) => return Exit::Reset(target),
                },
                push = pushes.recv() => match push {
                    None => return Exit::Lost("push stream closed".to_string()),
                    Some(payload) => {
                        if let Some(exit) = self.handle_push(payload).await {
                            return exit;
                        }
                    }
                },
                _ = heartbeat.tick() => match self.heartbeat().await {
                    Ok(()) => missed = 0,
                    Err(e) if e.is_connection_level() => return Exit::Lost(e.to_string()),
                    Err(e) => {
                        missed += 1;
                        warn!("Heartbeat missed ({}/{}): {}", missed, self.props.max_missed_heartbeats, e);
                        if missed >= self.props.max_missed_heartbeats {
                            return Exit::Lost(format!("{} consecutive heartbeats missed", missed));
                        }
                    }
                },
            }
        }
    }

    async fn heartbeat(&self) -> std::result::Result<(), TransportError> {
        let connection = self
            .current_connection()
            .ok_or_else(|| TransportError::ConnectionLost("no connection".to_string()))?;

        let mut req = HealthCheckRequest::new();
        req.set_request_id(Uuid::new_v4().to_string());
        let payload = req
            .to_payload()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let response =
            match tokio::time::timeout(self.props.heartbeat_timeout(), connection.request(payload))
                .await
            {
                Err(_) => return Err(TransportError::Request("heartbeat timed out".to_string())),
                Ok(result) => result?,
            };

        let resp: HealthCheckResponse = response
            .decode()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        if !resp.is_success() {
            return Err(TransportError::Request(format!(
                "heartbeat rejected: {}",
                resp.message()
            )));
        }
        Ok(())
    }

    async fn handle_push(&self, payload: Payload) -> Option<Exit> {
        let push_type = payload.payload_type().to_string();
        self.metrics.increment_push(&push_type);
        debug!("Dispatching server push: type={}", push_type);

        let (ack, exit) = match push_type.as_str() {
            "ConnectResetRequest" => match decode_push::<ConnectResetRequest>(&payload) {
                Some(req) => {
                    let target = (!req.server_ip.is_empty())
                        .then(|| format!("{}:{}", req.server_ip, req.server_port));
                    (
                        build_ack(ConnectResetResponse::new(), req.request_id()),
                        Some(Exit::Reset(target)),
                    )
                }
                None => (None, Some(Exit::Reset(None))),
            },
            "ClientDetectionRequest" => {
                let request_id = decode_push::<ClientDetectionRequest>(&payload)
                    .map(|req| req.request_id())
                    .unwrap_or_default();
                (build_ack(ClientDetectionResponse::new(), request_id), None)
            }
            _ => {
                let handler = self.push_handlers.get(&push_type).map(|h| h.clone());
                match handler {
                    Some(handler) => (handler.handle(&payload), None),
                    None => {
                        warn!("No handler registered for push type: {}", push_type);
                        (None, None)
                    }
                }
            }
        };

        if let Some(ack) = ack
            && let Some(connection) = self.current_connection()
            && let Err(e) = connection.reply(ack).await
        {
            error!("Failed to send push acknowledgment: {}", e);
        }

        exit
    }

    fn spawn_redo(&self) {
        let redo = self.redo.read().clone();
        if let Some(redo) = redo {
            tokio::spawn(async move {
                if let Err(e) = redo.redo_all().await {
                    error!("Redo after reconnect failed: {}", e);
                }
            });
        }
    }
}
