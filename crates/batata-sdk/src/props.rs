//! Client properties
//!
//! `ClientProps` carries everything needed to build a client: the server
//! list, namespace, credentials and the timing knobs of the session and
//! the stores. Props can be built in code with the `with_*` setters or
//! loaded with [`ClientProps::load`], which layers defaults, an optional
//! file and `BATATA_CLIENT_*` environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use batata_sdk_api::model::{DEFAULT_NAMESPACE, UNKNOWN_APP};

use crate::error::{ClientError, Result};

const ENV_PREFIX: &str = "BATATA_CLIENT";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientProps {
    /// Comma separated `host:port` list
    pub server_addr: String,
    pub namespace: String,
    pub app_name: String,
    pub username: String,
    pub password: String,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// Consecutive missed heartbeats before the session is considered lost
    pub max_missed_heartbeats: u32,
    pub reconnect_initial_backoff_ms: u64,
    pub reconnect_max_backoff_ms: u64,
    pub config_sync_interval_ms: u64,
    /// Ignore server snapshots with no instances when the cache has some
    pub naming_push_empty_protection: bool,
    pub naming_load_cache_at_start: bool,
    pub naming_cache_dir: Option<PathBuf>,
    pub labels: HashMap<String, String>,
}

impl Default for ClientProps {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8848".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            app_name: UNKNOWN_APP.to_string(),
            username: String::new(),
            password: String::new(),
            request_timeout_ms: 3000,
            connect_timeout_ms: 3000,
            heartbeat_interval_ms: 5000,
            heartbeat_timeout_ms: 3000,
            max_missed_heartbeats: 3,
            reconnect_initial_backoff_ms: 100,
            reconnect_max_backoff_ms: 30_000,
            config_sync_interval_ms: 30_000,
            naming_push_empty_protection: true,
            naming_load_cache_at_start: false,
            naming_cache_dir: None,
            labels: HashMap::new(),
        }
    }
}

impl ClientProps {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            ..Default::default()
        }
    }

    /// Load props from defaults, an optional file and the environment.
    ///
    /// Environment variables use the `BATATA_CLIENT_` prefix, e.g.
    /// `BATATA_CLIENT_SERVER_ADDR` or `BATATA_CLIENT_REQUEST_TIMEOUT_MS`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build()?;

        let props: ClientProps = config.try_deserialize()?;
        props.validate()?;
        Ok(props)
    }

    /// Check the props for values the client cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.server_addrs().is_empty() {
            return Err(ClientError::InvalidArgument(
                "server_addr must name at least one server".to_string(),
            ));
        }
        for (name, value) in [
            ("request_timeout_ms", self.request_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("config_sync_interval_ms", self.config_sync_interval_ms),
        ] {
            if value == 0 {
                return Err(ClientError::InvalidArgument(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.max_missed_heartbeats == 0 {
            return Err(ClientError::InvalidArgument(
                "max_missed_heartbeats must be at least 1".to_string(),
            ));
        }
        if self.reconnect_initial_backoff_ms > self.reconnect_max_backoff_ms {
            return Err(ClientError::InvalidArgument(
                "reconnect_initial_backoff_ms exceeds reconnect_max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Server addresses split from `server_addr`.
    pub fn server_addrs(&self) -> Vec<String> {
        self.server_addr
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self.heartbeat_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_missed_heartbeats(mut self, count: u32) -> Self {
        self.max_missed_heartbeats = count;
        self
    }

    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial_backoff_ms = initial.as_millis() as u64;
        self.reconnect_max_backoff_ms = max.as_millis() as u64;
        self
    }

    pub fn with_config_sync_interval(mut self, interval: Duration) -> Self {
        self.config_sync_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_naming_push_empty_protection(mut self, enabled: bool) -> Self {
        self.naming_push_empty_protection = enabled;
        self
    }

    pub fn with_naming_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.naming_cache_dir = Some(dir.into());
        self
    }

    pub fn with_naming_load_cache_at_start(mut self, enabled: bool) -> Self {
        self.naming_load_cache_at_start = enabled;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn config_sync_interval(&self) -> Duration {
        Duration::from_millis(self.config_sync_interval_ms)
    }
}
