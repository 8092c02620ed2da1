//! Client error types for the Batata SDK

use batata_sdk_api::config::ConfigKey;
use batata_sdk_api::remote::TransportError;

/// Error type for all client engine operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("config not found: {0}")]
    ConfigNotFound(ConfigKey),

    #[error("conflict: {0}")]
    ConflictError(String),

    #[error("session unavailable")]
    SessionUnavailable,

    #[error("interceptor contract violation: {0}")]
    InterceptorContractViolation(String),

    #[error("request timeout")]
    Timeout,

    #[error("server returned error: code={code}, message={message}")]
    ServerError { code: i32, message: String },

    #[error("fingerprint mismatch for {key}: server={server}, local={local}")]
    FingerprintMismatch {
        key: ConfigKey,
        server: String,
        local: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("auth failed: {0}")]
    AuthFailed(String),

    #[error("client closed")]
    Closed,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    /// Whether the error is a connectivity problem that a cached value may
    /// stand in for.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionError(_) | ClientError::SessionUnavailable | ClientError::Timeout
        )
    }
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::ConnectionLost(msg) | TransportError::Unreachable(msg) => {
                ClientError::ConnectionError(msg)
            }
            TransportError::Request(msg) => ClientError::Other(anyhow::anyhow!(msg)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
