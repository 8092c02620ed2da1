//! Configuration management API models
//!
//! This module defines the config key and the request/response models for
//! configuration query, publish, removal, listening and change pushes.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::remote::model::{Request, Response};

/// Identity of a configuration entry: `(data_id, group, tenant)`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigKey {
    pub data_id: String,
    pub group: String,
    pub tenant: String,
}

impl ConfigKey {
    pub fn new(
        data_id: impl Into<String>,
        group: impl Into<String>,
        tenant: impl Into<String>,
    ) -> Self {
        Self {
            data_id: data_id.into(),
            group: group.into(),
            tenant: tenant.into(),
        }
    }

    /// Group key in the `dataId+group[+tenant]` form used in logs and files.
    pub fn group_key(&self) -> String {
        if self.tenant.is_empty() {
            format!("{}+{}", self.data_id, self.group)
        } else {
            format!("{}+{}+{}", self.data_id, self.group, self.tenant)
        }
    }
}

impl Display for ConfigKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.group_key())
    }
}

/// Base configuration request structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigRequest {
    #[serde(flatten)]
    pub request: Request,
    pub data_id: String,
    pub group: String,
    pub tenant: String,
}

impl ConfigRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_key(key: &ConfigKey) -> Self {
        Self {
            request: Request::new(),
            data_id: key.data_id.clone(),
            group: key.group.clone(),
            tenant: key.tenant.clone(),
        }
    }

    pub fn key(&self) -> ConfigKey {
        ConfigKey::new(&self.data_id, &self.group, &self.tenant)
    }
}

/// Query one configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigQueryRequest {
    #[serde(flatten)]
    pub config_request: ConfigRequest,
    pub tag: String,
}

impl ConfigQueryRequest {
    pub fn for_key(key: &ConfigKey) -> Self {
        Self {
            config_request: ConfigRequest::for_key(key),
            tag: String::new(),
        }
    }
}

impl_request_trait!(ConfigQueryRequest, config_request.request, "ConfigQueryRequest");

/// Response for query configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigQueryResponse {
    #[serde(flatten)]
    pub response: Response,
    pub content: String,
    pub encrypted_data_key: String,
    pub content_type: String,
    pub md5: String,
    pub last_modified: i64,
}

impl ConfigQueryResponse {
    pub const CONFIG_NOT_FOUND: i32 = 300;
    pub const CONFIG_QUERY_CONFLICT: i32 = 400;
    pub const NO_RIGHT: i32 = 403;

    pub fn new() -> Self {
        Self {
            response: Response::new(),
            ..Default::default()
        }
    }
}

impl_response_trait!(ConfigQueryResponse, "ConfigQueryResponse");

/// Publish (create or update) one configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPublishRequest {
    #[serde(flatten)]
    pub config_request: ConfigRequest,
    pub content: String,
    pub cas_md5: String,
    pub encrypted_data_key: String,
    pub addition_map: HashMap<String, String>,
}

impl ConfigPublishRequest {
    pub fn for_key(key: &ConfigKey, content: impl Into<String>) -> Self {
        Self {
            config_request: ConfigRequest::for_key(key),
            content: content.into(),
            ..Default::default()
        }
    }
}

impl_request_trait!(ConfigPublishRequest, config_request.request, "ConfigPublishRequest");

/// Response for publish configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPublishResponse {
    #[serde(flatten)]
    pub response: Response,
}

impl ConfigPublishResponse {
    /// The server rejected the publish because the stored content changed
    /// since the caller's `cas_md5`.
    pub const CAS_CONFLICT: i32 = 409;

    pub fn new() -> Self {
        Self {
            response: Response::new(),
        }
    }
}

impl_response_trait!(ConfigPublishResponse, "ConfigPublishResponse");

/// Remove one configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigRemoveRequest {
    #[serde(flatten)]
    pub config_request: ConfigRequest,
    pub tag: String,
}

impl ConfigRemoveRequest {
    pub fn for_key(key: &ConfigKey) -> Self {
        Self {
            config_request: ConfigRequest::for_key(key),
            tag: String::new(),
        }
    }
}

impl_request_trait!(ConfigRemoveRequest, config_request.request, "ConfigRemoveRequest");

/// Response for remove configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigRemoveResponse {
    #[serde(flatten)]
    pub response: Response,
}

impl ConfigRemoveResponse {
    pub fn new() -> Self {
        Self {
            response: Response::new(),
        }
    }
}

impl_response_trait!(ConfigRemoveResponse, "ConfigRemoveResponse");

/// Configuration listen context: one watched key and its last known MD5
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigListenContext {
    pub group: String,
    pub md5: String,
    pub data_id: String,
    pub tenant: String,
}

impl ConfigListenContext {
    pub fn new(key: &ConfigKey, md5: impl Into<String>) -> Self {
        Self {
            group: key.group.clone(),
            md5: md5.into(),
            data_id: key.data_id.clone(),
            tenant: key.tenant.clone(),
        }
    }

    pub fn key(&self) -> ConfigKey {
        ConfigKey::new(&self.data_id, &self.group, &self.tenant)
    }
}

/// Start (`listen = true`) or stop watching a batch of configurations.
///
/// With `listen = true` the server also compares the supplied MD5s and
/// reports the keys whose content differs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigBatchListenRequest {
    #[serde(flatten)]
    pub request: Request,
    pub listen: bool,
    pub config_listen_contexts: Vec<ConfigListenContext>,
}

impl ConfigBatchListenRequest {
    pub fn new(listen: bool, config_listen_contexts: Vec<ConfigListenContext>) -> Self {
        Self {
            request: Request::new(),
            listen,
            config_listen_contexts,
        }
    }
}

impl_request_trait!(ConfigBatchListenRequest, request, "ConfigBatchListenRequest");

/// A configuration reported as changed
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigContext {
    pub data_id: String,
    pub group: String,
    pub tenant: String,
}

impl ConfigContext {
    pub fn key(&self) -> ConfigKey {
        ConfigKey::new(&self.data_id, &self.group, &self.tenant)
    }
}

/// Response for batch listen
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigChangeBatchListenResponse {
    #[serde(flatten)]
    pub response: Response,
    pub changed_configs: Vec<ConfigContext>,
}

impl ConfigChangeBatchListenResponse {
    pub fn new() -> Self {
        Self {
            response: Response::new(),
            changed_configs: Vec::new(),
        }
    }
}

impl_response_trait!(ConfigChangeBatchListenResponse, "ConfigChangeBatchListenResponse");

/// Server push: a watched configuration changed
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigChangeNotifyRequest {
    #[serde(flatten)]
    pub request: Request,
    pub data_id: String,
    pub group: String,
    pub tenant: String,
}

impl ConfigChangeNotifyRequest {
    /// Create a new config change notification for a specific config
    pub fn for_config(key: &ConfigKey) -> Self {
        Self {
            request: Request::new(),
            data_id: key.data_id.clone(),
            group: key.group.clone(),
            tenant: key.tenant.clone(),
        }
    }

    pub fn key(&self) -> ConfigKey {
        ConfigKey::new(&self.data_id, &self.group, &self.tenant)
    }
}

impl_request_trait!(ConfigChangeNotifyRequest, request, "ConfigChangeNotifyRequest");

/// Acknowledgment of a config change push
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigChangeNotifyResponse {
    #[serde(flatten)]
    pub response: Response,
}

impl ConfigChangeNotifyResponse {
    pub fn new() -> Self {
        Self {
            response: Response::new(),
        }
    }
}

impl_response_trait!(ConfigChangeNotifyResponse, "ConfigChangeNotifyResponse");
