//! Naming service API models
//!
//! This module defines service keys, instances, versioned service info and
//! the request/response models for registration, query and subscription.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::model::{DEFAULT_CLUSTER, SERVICE_INFO_SPLITER};
use crate::remote::model::{Request, Response};

// Instance request types
pub const REGISTER_INSTANCE: &str = "registerInstance";
pub const DE_REGISTER_INSTANCE: &str = "deregisterInstance";
pub const BATCH_REGISTER_INSTANCE: &str = "batchRegisterInstance";

/// Identity of a service: `(service_name, group_name, namespace)`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceKey {
    pub service_name: String,
    pub group_name: String,
    pub namespace: String,
}

impl ServiceKey {
    pub fn new(
        service_name: impl Into<String>,
        group_name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            group_name: group_name.into(),
            namespace: namespace.into(),
        }
    }

    /// `groupName@@serviceName`
    pub fn grouped_name(&self) -> String {
        format!(
            "{}{}{}",
            self.group_name, SERVICE_INFO_SPLITER, self.service_name
        )
    }
}

impl Display for ServiceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.grouped_name())
        } else {
            write!(f, "{}#{}", self.namespace, self.grouped_name())
        }
    }
}

/// A registered service instance.
///
/// Identity within a service is `(ip, port)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    pub instance_id: String,
    pub ip: String,
    pub port: i32,
    pub weight: f64,
    pub healthy: bool,
    pub enabled: bool,
    pub ephemeral: bool,
    pub cluster_name: String,
    pub service_name: String,
    pub metadata: HashMap<String, String>,
}

impl Default for Instance {
    fn default() -> Self {
        Self {
            instance_id: String::new(),
            ip: String::new(),
            port: 0,
            weight: 1.0,
            healthy: true,
            enabled: true,
            ephemeral: true,
            cluster_name: DEFAULT_CLUSTER.to_string(),
            service_name: String::new(),
            metadata: HashMap::new(),
        }
    }
}

impl Instance {
    pub fn new(ip: impl Into<String>, port: i32) -> Self {
        Self {
            ip: ip.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_cluster(mut self, cluster_name: impl Into<String>) -> Self {
        self.cluster_name = cluster_name.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Identity key `ip#port`.
    pub fn key(&self) -> String {
        format!("{}#{}", self.ip, self.port)
    }

    /// Whether the instance should receive traffic.
    pub fn is_available(&self) -> bool {
        self.healthy && self.enabled
    }
}

/// A versioned view of one service's instances.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Service {
    pub name: String,
    pub group_name: String,
    pub clusters: String,
    pub cache_millis: i64,
    pub hosts: Vec<Instance>,
    pub last_ref_time: i64,
    pub checksum: String,
    /// Server-assigned version, increasing with every change.
    pub version: u64,
}

impl Service {
    pub fn new(name: impl Into<String>, group_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group_name: group_name.into(),
            cache_millis: 10000,
            ..Default::default()
        }
    }

    /// Healthy and enabled instances.
    pub fn available_hosts(&self) -> Vec<&Instance> {
        self.hosts.iter().filter(|h| h.is_available()).collect()
    }
}

/// Base naming request structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NamingRequest {
    #[serde(flatten)]
    pub request: Request,
    pub namespace: String,
    pub service_name: String,
    pub group_name: String,
}

impl NamingRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_service(key: &ServiceKey) -> Self {
        Self {
            request: Request::new(),
            namespace: key.namespace.clone(),
            service_name: key.service_name.clone(),
            group_name: key.group_name.clone(),
        }
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.service_name, &self.group_name, &self.namespace)
    }
}

/// Instance registration/deregistration request
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceRequest {
    #[serde(flatten)]
    pub naming_request: NamingRequest,
    pub r#type: String,
    pub instance: Instance,
}

impl InstanceRequest {
    pub fn new(key: &ServiceKey, r#type: &str, instance: Instance) -> Self {
        Self {
            naming_request: NamingRequest::for_service(key),
            r#type: r#type.to_string(),
            instance,
        }
    }
}

impl_request_trait!(InstanceRequest, naming_request.request, "InstanceRequest");

/// Batch instance request for multiple instances
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchInstanceRequest {
    #[serde(flatten)]
    pub naming_request: NamingRequest,
    pub r#type: String,
    pub instances: Vec<Instance>,
}

impl BatchInstanceRequest {
    pub fn new(key: &ServiceKey, instances: Vec<Instance>) -> Self {
        Self {
            naming_request: NamingRequest::for_service(key),
            r#type: BATCH_REGISTER_INSTANCE.to_string(),
            instances,
        }
    }
}

impl_request_trait!(BatchInstanceRequest, naming_request.request, "BatchInstanceRequest");

/// Query a service's instances once
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceQueryRequest {
    #[serde(flatten)]
    pub naming_request: NamingRequest,
    pub cluster: String,
    pub healthy_only: bool,
}

impl ServiceQueryRequest {
    pub fn new(key: &ServiceKey) -> Self {
        Self {
            naming_request: NamingRequest::for_service(key),
            ..Default::default()
        }
    }
}

impl_request_trait!(ServiceQueryRequest, naming_request.request, "ServiceQueryRequest");

/// Subscribe to (or unsubscribe from) service changes
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscribeServiceRequest {
    #[serde(flatten)]
    pub naming_request: NamingRequest,
    pub subscribe: bool,
    pub clusters: String,
}

impl SubscribeServiceRequest {
    pub fn new(key: &ServiceKey, subscribe: bool) -> Self {
        Self {
            naming_request: NamingRequest::for_service(key),
            subscribe,
            clusters: String::new(),
        }
    }
}

impl_request_trait!(SubscribeServiceRequest, naming_request.request, "SubscribeServiceRequest");

/// Server push: the full, versioned instance list of a subscribed service
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifySubscriberRequest {
    #[serde(flatten)]
    pub request: Request,
    pub namespace: String,
    pub service_name: String,
    pub group_name: String,
    pub service_info: Service,
}

impl NotifySubscriberRequest {
    /// Create a notification for a service change
    pub fn for_service(key: &ServiceKey, service_info: Service) -> Self {
        Self {
            request: Request::new(),
            namespace: key.namespace.clone(),
            group_name: key.group_name.clone(),
            service_name: key.service_name.clone(),
            service_info,
        }
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(&self.service_name, &self.group_name, &self.namespace)
    }
}

impl_request_trait!(NotifySubscriberRequest, request, "NotifySubscriberRequest");

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceResponse {
    #[serde(flatten)]
    pub response: Response,
    pub r#type: String,
}

impl InstanceResponse {
    pub fn new() -> Self {
        Self {
            response: Response::new(),
            r#type: String::new(),
        }
    }
}

impl_response_trait!(InstanceResponse, "InstanceResponse");

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchInstanceResponse {
    #[serde(flatten)]
    pub response: Response,
    pub r#type: String,
}

impl BatchInstanceResponse {
    pub fn new() -> Self {
        Self {
            response: Response::new(),
            r#type: String::new(),
        }
    }
}

impl_response_trait!(BatchInstanceResponse, "BatchInstanceResponse");

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryServiceResponse {
    #[serde(flatten)]
    pub response: Response,
    pub service_info: Service,
}

impl QueryServiceResponse {
    pub fn new(service_info: Service) -> Self {
        Self {
            response: Response::new(),
            service_info,
        }
    }
}

impl_response_trait!(QueryServiceResponse, "QueryServiceResponse");

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscribeServiceResponse {
    #[serde(flatten)]
    pub response: Response,
    pub service_info: Service,
}

impl SubscribeServiceResponse {
    pub fn new(service_info: Service) -> Self {
        Self {
            response: Response::new(),
            service_info,
        }
    }
}

impl_response_trait!(SubscribeServiceResponse, "SubscribeServiceResponse");

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifySubscriberResponse {
    #[serde(flatten)]
    pub response: Response,
}

impl NotifySubscriberResponse {
    pub fn new() -> Self {
        Self {
            response: Response::new(),
        }
    }
}

impl_response_trait!(NotifySubscriberResponse, "NotifySubscriberResponse");
