//! Configuration interceptor chain
//!
//! A single caller-supplied hook sees every outbound publish and every
//! inbound read or push, typically to encrypt and decrypt content. Each
//! invocation fills exactly one input slot:
//! - `(Some(request), None)` before a publish
//! - `(None, Some(response))` after a read or push
//!
//! and the hook must hand back exactly that slot. Anything else is a
//! contract violation and rejects the operation.

use std::sync::Arc;

use batata_sdk_api::config::ConfigKey;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Config request passed to the interceptor before publishing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigRequest {
    pub data_id: String,
    pub group: String,
    pub namespace: String,
    pub content: String,
    pub encrypted_data_key: String,
}

impl ConfigRequest {
    pub fn new(key: &ConfigKey, content: impl Into<String>) -> Self {
        Self {
            data_id: key.data_id.clone(),
            group: key.group.clone(),
            namespace: key.tenant.clone(),
            content: content.into(),
            encrypted_data_key: String::new(),
        }
    }
}

/// Config response passed to the interceptor after querying
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigResponse {
    pub data_id: String,
    pub group: String,
    pub namespace: String,
    pub content: String,
    pub encrypted_data_key: String,
}

impl ConfigResponse {
    pub fn new(
        key: &ConfigKey,
        content: impl Into<String>,
        encrypted_data_key: impl Into<String>,
    ) -> Self {
        Self {
            data_id: key.data_id.clone(),
            group: key.group.clone(),
            namespace: key.tenant.clone(),
            content: content.into(),
            encrypted_data_key: encrypted_data_key.into(),
        }
    }
}

/// The caller's hook.
pub trait ConfigInterceptor: Send + Sync + 'static {
    fn intercept(
        &self,
        request: Option<ConfigRequest>,
        response: Option<ConfigResponse>,
    ) -> (Option<ConfigRequest>, Option<ConfigResponse>);
}

/// An interceptor that invokes a closure.
pub struct FnConfigInterceptor<F>
where
    F: Fn(
            Option<ConfigRequest>,
            Option<ConfigResponse>,
        ) -> (Option<ConfigRequest>, Option<ConfigResponse>)
        + Send
        + Sync
        + 'static,
{
    f: F,
}

impl<F> FnConfigInterceptor<F>
where
    F: Fn(
            Option<ConfigRequest>,
            Option<ConfigResponse>,
        ) -> (Option<ConfigRequest>, Option<ConfigResponse>)
        + Send
        + Sync
        + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ConfigInterceptor for FnConfigInterceptor<F>
where
    F: Fn(
            Option<ConfigRequest>,
            Option<ConfigResponse>,
        ) -> (Option<ConfigRequest>, Option<ConfigResponse>)
        + Send
        + Sync
        + 'static,
{
    fn intercept(
        &self,
        request: Option<ConfigRequest>,
        response: Option<ConfigResponse>,
    ) -> (Option<ConfigRequest>, Option<ConfigResponse>) {
        (self.f)(request, response)
    }
}

/// Holds at most one interceptor and enforces its contract.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptor: Option<Arc<dyn ConfigInterceptor>>,
}

impl InterceptorChain {
    pub fn new(interceptor: Option<Arc<dyn ConfigInterceptor>>) -> Self {
        Self { interceptor }
    }

    pub fn is_empty(&self) -> bool {
        self.interceptor.is_none()
    }

    /// Run the hook on a request about to be published.
    pub fn outbound(&self, request: ConfigRequest) -> Result<ConfigRequest> {
        let Some(interceptor) = &self.interceptor else {
            return Ok(request);
        };
        debug!(
            "Intercepting publish: dataId={}, group={}",
            request.data_id, request.group
        );
        match interceptor.intercept(Some(request), None) {
            (Some(request), None) => Ok(request),
            (request, response) => Err(violation("outbound", request.is_some(), response.is_some())),
        }
    }

    /// Run the hook on a value read from the server.
    pub fn inbound(&self, response: ConfigResponse) -> Result<ConfigResponse> {
        let Some(interceptor) = &self.interceptor else {
            return Ok(response);
        };
        debug!(
            "Intercepting read: dataId={}, group={}",
            response.data_id, response.group
        );
        match interceptor.intercept(None, Some(response)) {
            (None, Some(response)) => Ok(response),
            (request, response) => Err(violation("inbound", request.is_some(), response.is_some())),
        }
    }

    /// [`inbound`](Self::inbound) on a blocking worker, so a stuck hook
    /// only stalls the caller awaiting it.
    pub async fn inbound_blocking(&self, response: ConfigResponse) -> Result<ConfigResponse> {
        if self.is_empty() {
            return Ok(response);
        }
        let chain = self.clone();
        tokio::task::spawn_blocking(move || chain.inbound(response))
            .await
            .map_err(|e| ClientError::Other(anyhow::anyhow!("interceptor task failed: {}", e)))?
    }
}

fn violation(direction: &str, request: bool, response: bool) -> ClientError {
    let returned = match (request, response) {
        (true, true) => "both slots",
        (false, false) => "neither slot",
        (true, false) => "the request slot",
        (false, true) => "the response slot",
    };
    ClientError::InterceptorContractViolation(format!(
        "{} interceptor returned {}",
        direction, returned
    ))
}
