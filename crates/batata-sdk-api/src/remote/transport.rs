//! Transport boundary
//!
//! The SDK engine does not speak any wire protocol itself. A wire layer
//! (gRPC, WebSocket, in-memory for tests) implements [`Transport`] and hands
//! back a [`ConnectionHandle`]: a request/reply [`Connection`] plus a channel
//! of server-initiated pushes. A closed push channel means the connection is
//! gone.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::model::{ConnectionSetupRequest, Payload};

/// Transport-level failures.
///
/// `ConnectionLost` and `Unreachable` describe the connection itself and
/// make the session reconnect; `Request` is scoped to a single exchange.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("server unreachable: {0}")]
    Unreachable(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Whether the error means the underlying connection is unusable.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionLost(_) | TransportError::Unreachable(_)
        )
    }
}

/// An established connection to one server.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Connection id assigned by the server.
    fn connection_id(&self) -> &str;

    /// Send a request and wait for its response.
    async fn request(&self, payload: Payload) -> Result<Payload, TransportError>;

    /// Acknowledge a server push.
    async fn reply(&self, payload: Payload) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    async fn close(&self);
}

/// A freshly opened connection with its push stream.
pub struct ConnectionHandle {
    pub connection: Arc<dyn Connection>,
    pub pushes: mpsc::Receiver<Payload>,
}

/// Factory for connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `server_addr` and perform the setup handshake.
    async fn connect(
        &self,
        server_addr: &str,
        setup: &ConnectionSetupRequest,
    ) -> Result<ConnectionHandle, TransportError>;
}
