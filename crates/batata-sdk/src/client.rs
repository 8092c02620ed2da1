//! Client facade
//!
//! `BatataClient` owns one session plus the config and naming stores built
//! on it. Build one with [`ClientBuilder`].

use std::sync::Arc;

use batata_sdk_api::remote::Transport;
use tracing::info;

use crate::auth::{CredentialProvider, HttpLoginProvider, NoCredentials};
use crate::config::ConfigStore;
use crate::config::filter::{ConfigInterceptor, InterceptorChain};
use crate::error::{ClientError, Result};
use crate::metrics::MetricsMonitor;
use crate::naming::NamingStore;
use crate::props::ClientProps;
use crate::redo::RedoService;
use crate::session::{SessionManager, SessionState};

/// Builder for [`BatataClient`].
pub struct ClientBuilder {
    props: ClientProps,
    transport: Option<Arc<dyn Transport>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    interceptor: Option<Arc<dyn ConfigInterceptor>>,
}

impl ClientBuilder {
    pub fn new(props: ClientProps) -> Self {
        Self {
            props,
            transport: None,
            credentials: None,
            interceptor: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override the credential provider. Defaults to a username/password
    /// login when `ClientProps::username` is set, otherwise no credentials.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Install the config interceptor. A later call replaces an earlier one.
    pub fn interceptor(mut self, interceptor: Arc<dyn ConfigInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Connect and assemble the client.
    pub async fn build(self) -> Result<BatataClient> {
        let transport = self
            .transport
            .ok_or_else(|| ClientError::InvalidArgument("a transport is required".to_string()))?;

        let credentials = match self.credentials {
            Some(credentials) => credentials,
            None => default_credentials(&self.props)?,
        };

        let metrics = Arc::new(
            MetricsMonitor::new()
                .map_err(|e| ClientError::Other(anyhow::anyhow!("metrics setup failed: {}", e)))?,
        );

        let session =
            SessionManager::connect(self.props, transport, credentials, metrics.clone()).await?;

        let config = ConfigStore::new(session.clone(), InterceptorChain::new(self.interceptor));
        let naming = NamingStore::new(session.clone());
        session.set_redo(Arc::new(RedoService::new(
            Some(config.clone()),
            Some(naming.clone()),
        )));

        info!(
            "Client started, namespace={:?}, servers={:?}",
            session.namespace(),
            session.props().server_addrs()
        );

        Ok(BatataClient {
            session,
            config,
            naming,
            metrics,
        })
    }
}

fn default_credentials(props: &ClientProps) -> Result<Arc<dyn CredentialProvider>> {
    if props.username.is_empty() {
        return Ok(Arc::new(NoCredentials));
    }
    let server = props
        .server_addrs()
        .into_iter()
        .next()
        .ok_or_else(|| ClientError::InvalidArgument("server_addr must not be empty".to_string()))?;
    Ok(Arc::new(HttpLoginProvider::new(
        &server,
        &props.username,
        &props.password,
    )?))
}

/// Config and naming client over one session.
pub struct BatataClient {
    session: Arc<SessionManager>,
    config: Arc<ConfigStore>,
    naming: Arc<NamingStore>,
    metrics: Arc<MetricsMonitor>,
}

impl BatataClient {
    pub fn builder(props: ClientProps) -> ClientBuilder {
        ClientBuilder::new(props)
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn naming(&self) -> &Arc<NamingStore> {
        &self.naming
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn metrics(&self) -> &Arc<MetricsMonitor> {
        &self.metrics
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Stop dispatch and background tasks and close the session.
    pub async fn shutdown(&self) {
        self.config.shutdown();
        self.naming.shutdown();
        self.session.shutdown().await;
    }
}

impl Drop for BatataClient {
    fn drop(&mut self) {
        self.config.shutdown();
        self.naming.shutdown();
        self.session.shutdown_now();
    }
}
