//! Credential providers
//!
//! The session asks its provider for a token before connecting and attaches
//! it to every request in the `accessToken` header. Before each reconnect
//! the provider is told to refresh.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Token refresh buffer: refresh 5 minutes before expiry
const TOKEN_REFRESH_BUFFER_SECS: u64 = 300;

/// Default token lifetime when the server does not report one
const DEFAULT_TOKEN_TTL_SECS: u64 = 18000;

/// Source of access tokens.
#[async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
    /// The current token, if authentication is in use.
    async fn token(&self) -> Result<Option<String>>;

    /// Drop any cached token and obtain a fresh one.
    async fn refresh(&self) -> Result<()>;
}

/// Provider for servers with authentication disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn token(&self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// Provider handing out a fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn token(&self) -> Result<Option<String>> {
        Ok(Some(self.token.clone()))
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// Cached token info
#[derive(Clone, Debug)]
struct TokenInfo {
    access_token: String,
    expires_at: Instant,
}

/// Provider that obtains tokens via HTTP username/password login and
/// caches them until shortly before expiry.
pub struct HttpLoginProvider {
    http_client: Client,
    server_addr: String,
    username: String,
    password: String,
    token: RwLock<Option<TokenInfo>>,
}

impl HttpLoginProvider {
    /// Create a new provider.
    ///
    /// `server_addr` is a `host:port` or a base URL such as
    /// `http://127.0.0.1:8848`.
    pub fn new(server_addr: &str, username: &str, password: &str) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::Other(e.into()))?;

        let base = if server_addr.starts_with("http") {
            server_addr.to_string()
        } else {
            format!("http://{}", server_addr)
        };

        Ok(Self {
            http_client,
            server_addr: base.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            token: RwLock::new(None),
        })
    }

    fn cached(&self) -> Option<String> {
        let guard = self.token.read();
        guard.as_ref().and_then(|info| {
            let deadline = Instant::now() + Duration::from_secs(TOKEN_REFRESH_BUFFER_SECS);
            (info.expires_at > deadline).then(|| info.access_token.clone())
        })
    }

    /// Perform HTTP login and cache the token.
    async fn login(&self) -> Result<String> {
        let url = format!("{}/nacos/v3/auth/user/login", self.server_addr);

        debug!("Authenticating with server: {}", url);

        let response = self
            .http_client
            .post(&url)
            .form(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await
            .map_err(|e| ClientError::AuthFailed(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::AuthFailed(format!(
                "Login failed with status {}: {}",
                status, body
            )));
        }

        let result: serde_json::Value = response.json().await.map_err(|e| {
            ClientError::AuthFailed(format!("Failed to parse login response: {}", e))
        })?;

        let (access_token, ttl) = parse_login_response(&result)?;

        *self.token.write() = Some(TokenInfo {
            access_token: access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });

        debug!(
            "Authentication successful, token expires in {} seconds",
            ttl
        );

        Ok(access_token)
    }
}

/// Extract the token and its ttl from a v3 (`data.accessToken`) or v2
/// (`accessToken`) login response.
fn parse_login_response(result: &serde_json::Value) -> Result<(String, u64)> {
    let access_token = result
        .get("data")
        .and_then(|d| d.get("accessToken"))
        .or_else(|| result.get("accessToken"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            ClientError::AuthFailed(format!("No accessToken in login response: {}", result))
        })?;

    let ttl = result
        .get("data")
        .and_then(|d| d.get("tokenTtl"))
        .or_else(|| result.get("tokenTtl"))
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_TOKEN_TTL_SECS);

    Ok((access_token.to_string(), ttl))
}

#[async_trait]
impl CredentialProvider for HttpLoginProvider {
    async fn token(&self) -> Result<Option<String>> {
        if let Some(token) = self.cached() {
            return Ok(Some(token));
        }
        self.login().await.map(Some)
    }

    async fn refresh(&self) -> Result<()> {
        self.token.write().take();
        self.login().await.map(|_| ())
    }
}
