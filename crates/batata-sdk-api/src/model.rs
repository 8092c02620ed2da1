//! Common protocol constants shared by the config and naming modules.

// Client protocol version
pub const CLIENT_VERSION: &str = "3.0.0";
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";
pub const DEFAULT_NAMESPACE: &str = "";
pub const DEFAULT_CLUSTER: &str = "DEFAULT";
pub const UNKNOWN_APP: &str = "UnknownApp";

// Header and parameter keys
pub const APPNAME: &str = "AppName";
pub const CLIENT_VERSION_KEY: &str = "ClientVersion";
pub const ACCESS_TOKEN: &str = "accessToken";
pub const CONTENT_TYPE_KEY: &str = "type";

// Connection labels
pub const LABEL_SOURCE: &str = "source";
pub const LABEL_SOURCE_SDK: &str = "sdk";
pub const LABEL_MODULE: &str = "module";
pub const LABEL_MODULE_CONFIG: &str = "config";
pub const LABEL_MODULE_NAMING: &str = "naming";

// Config content types
pub const CONTENT_TYPE_TEXT: &str = "text";

/// Separator between group and service name in grouped service names.
pub const SERVICE_INFO_SPLITER: &str = "@@";
