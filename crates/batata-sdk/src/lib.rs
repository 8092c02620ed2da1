//! Batata SDK - client engine for Nacos-compatible configuration and
//! service discovery
//!
//! This crate provides:
//! - A self-healing session with heartbeats, reconnect backoff and redo
//! - `ConfigStore` with a fingerprinted cache, listeners and reconciliation
//! - `NamingStore` with registration, versioned snapshots and subscriptions
//! - Ordered, panic-isolated listener dispatch
//! - A config interceptor hook for encryption and similar transforms
//! - Credential providers, per-client Prometheus metrics and logging setup
//!
//! The wire transport is supplied by the caller through
//! [`batata_sdk_api::remote::Transport`].

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod listener_hub;
pub mod logging;
pub mod metrics;
pub mod naming;
pub mod props;
pub mod redo;
pub mod session;

pub use batata_sdk_api as api;

pub use auth::{CredentialProvider, HttpLoginProvider, NoCredentials, StaticToken};
pub use client::{BatataClient, ClientBuilder};
pub use config::filter::{
    ConfigInterceptor, ConfigRequest, ConfigResponse, FnConfigInterceptor, InterceptorChain,
};
pub use config::{ConfigChangeListener, ConfigEntry, ConfigStore, FnConfigChangeListener};
pub use error::{ClientError, Result};
pub use metrics::{MetricsMonitor, Timer};
pub use naming::{EventListener, FnEventListener, NamingEvent, NamingStore, Subscription};
pub use props::ClientProps;
pub use redo::RedoService;
pub use session::{SessionManager, SessionState};
