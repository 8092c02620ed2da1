//! Remote API models for client/server communication
//!
//! Every message travels as a [`Payload`]: a typed metadata header plus a
//! JSON body. Requests and responses implement [`RequestTrait`] and
//! [`ResponseTrait`] to convert to and from payloads.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Payload metadata: message type and headers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Metadata {
    pub r#type: String,
    pub client_ip: String,
    pub headers: HashMap<String, String>,
}

/// Message envelope exchanged with the server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub metadata: Option<Metadata>,
    pub body: Vec<u8>,
}

impl Payload {
    /// The message type carried in the metadata, or an empty string.
    pub fn payload_type(&self) -> &str {
        self.metadata
            .as_ref()
            .map(|m| m.r#type.as_str())
            .unwrap_or_default()
    }

    /// Look up a metadata header.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.headers.get(key))
            .map(String::as_str)
    }

    /// Decode the JSON body into a concrete model.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        if self.body.is_empty() {
            return serde_json::from_slice(b"{}");
        }
        serde_json::from_slice(&self.body)
    }
}

/// Base trait for all request models
pub trait RequestTrait {
    fn headers(&self) -> HashMap<String, String>;

    fn request_type(&self) -> &'static str;

    fn insert_headers(&mut self, headers: HashMap<String, String>);

    fn request_id(&self) -> String;

    fn set_request_id(&mut self, request_id: String);

    fn body(&self) -> serde_json::Result<Vec<u8>>
    where
        Self: Serialize,
    {
        serde_json::to_vec(self)
    }

    /// Build the wire payload; headers travel in the metadata.
    fn to_payload(&self) -> serde_json::Result<Payload>
    where
        Self: Serialize,
    {
        Ok(Payload {
            metadata: Some(Metadata {
                r#type: self.request_type().to_string(),
                headers: self.headers(),
                ..Default::default()
            }),
            body: self.body()?,
        })
    }
}

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Success = 200,
    Fail = 500,
}

impl ResponseCode {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn desc(&self) -> &'static str {
        match self {
            ResponseCode::Success => "Response ok",
            ResponseCode::Fail => "Response fail",
        }
    }
}

/// Base trait for all response models
pub trait ResponseTrait {
    fn response_type(&self) -> &'static str;

    fn set_request_id(&mut self, request_id: String);

    fn error_code(&self) -> i32;

    fn result_code(&self) -> i32;

    fn message(&self) -> String;

    fn is_success(&self) -> bool {
        self.result_code() == ResponseCode::Success.code()
    }

    fn to_payload(&self) -> serde_json::Result<Payload>
    where
        Self: Serialize,
    {
        Ok(Payload {
            metadata: Some(Metadata {
                r#type: self.response_type().to_string(),
                ..Default::default()
            }),
            body: serde_json::to_vec(self)?,
        })
    }
}

/// Base request structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Request {
    #[serde(skip)]
    pub headers: HashMap<String, String>,
    pub request_id: String,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Base response structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Response {
    pub result_code: i32,
    pub error_code: i32,
    pub success: bool,
    pub message: String,
    pub request_id: String,
}

impl Response {
    pub fn new() -> Self {
        Self {
            result_code: ResponseCode::Success.code(),
            success: true,
            ..Default::default()
        }
    }

    /// A failed response carrying an error code and message.
    pub fn fail(error_code: i32, message: impl Into<String>) -> Self {
        Self {
            result_code: ResponseCode::Fail.code(),
            error_code,
            success: false,
            message: message.into(),
            request_id: String::new(),
        }
    }
}

/// Health check request, used as the session heartbeat
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheckRequest {
    #[serde(flatten)]
    pub request: Request,
}

impl HealthCheckRequest {
    pub fn new() -> Self {
        Self::default()
    }
}

impl_request_trait!(HealthCheckRequest, request, "HealthCheckRequest");

/// Health check response
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheckResponse {
    #[serde(flatten)]
    pub response: Response,
}

impl HealthCheckResponse {
    pub fn new() -> Self {
        Self {
            response: Response::new(),
        }
    }
}

impl_response_trait!(HealthCheckResponse, "HealthCheckResponse");

/// Connection setup sent when a connection is established
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSetupRequest {
    #[serde(flatten)]
    pub request: Request,
    pub client_version: String,
    pub tenant: String,
    pub labels: HashMap<String, String>,
}

impl ConnectionSetupRequest {
    pub fn new() -> Self {
        Self::default()
    }
}

impl_request_trait!(ConnectionSetupRequest, request, "ConnectionSetupRequest");

/// Server request checking that the client connection is alive
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientDetectionRequest {
    #[serde(flatten)]
    pub request: Request,
}

impl_request_trait!(ClientDetectionRequest, request, "ClientDetectionRequest");

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientDetectionResponse {
    #[serde(flatten)]
    pub response: Response,
}

impl ClientDetectionResponse {
    pub fn new() -> Self {
        Self {
            response: Response::new(),
        }
    }
}

impl_response_trait!(ClientDetectionResponse, "ClientDetectionResponse");

/// Server request asking the client to drop and re-establish its connection,
/// optionally against a specific server.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectResetRequest {
    #[serde(flatten)]
    pub request: Request,
    pub server_ip: String,
    pub server_port: String,
}

impl_request_trait!(ConnectResetRequest, request, "ConnectResetRequest");

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectResetResponse {
    #[serde(flatten)]
    pub response: Response,
}

impl ConnectResetResponse {
    pub fn new() -> Self {
        Self {
            response: Response::new(),
        }
    }
}

impl_response_trait!(ConnectResetResponse, "ConnectResetResponse");
