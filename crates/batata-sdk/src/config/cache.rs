//! Config cache data for tracking per-config state

use std::sync::Arc;

use batata_sdk_api::config::ConfigKey;
use batata_sdk_api::model::CONTENT_TYPE_TEXT;
use md5::{Digest, Md5};

/// A configuration value as seen by the caller.
///
/// `fingerprint` is the MD5 hex of `content`. An entry for a key the server
/// does not have (never created or deleted) has empty content and an empty
/// fingerprint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigEntry {
    pub key: ConfigKey,
    pub content: String,
    pub fingerprint: String,
    pub encrypted_data_key: Option<String>,
    pub content_type: String,
    /// Milliseconds since the epoch
    pub last_modified: i64,
}

impl ConfigEntry {
    /// Whether the server holds a value for this key.
    pub fn exists(&self) -> bool {
        !self.fingerprint.is_empty()
    }
}

/// A fetched value after verification and the inbound interceptor.
#[derive(Clone, Debug, Default)]
pub struct FetchedConfig {
    pub content: String,
    /// MD5 of the content as stored on the server
    pub server_md5: String,
    pub encrypted_data_key: String,
    pub content_type: String,
    pub last_modified: i64,
}

/// Cache entry for a single config item.
pub struct CacheData {
    pub key: ConfigKey,
    pub content: String,
    /// MD5 of `content`; empty while the key has no value
    pub md5: String,
    /// MD5 the server reported; sent back in listen requests
    pub server_md5: String,
    pub encrypted_data_key: String,
    pub content_type: String,
    pub last_modified: i64,
    /// A server-side watch exists for this key
    pub is_listening: bool,
    /// Content has been loaded from the server at least once
    pub initialized: bool,
    refresh_lock: Arc<tokio::sync::Mutex<()>>,
}

impl CacheData {
    pub fn new(key: ConfigKey) -> Self {
        Self {
            key,
            content: String::new(),
            md5: String::new(),
            server_md5: String::new(),
            encrypted_data_key: String::new(),
            content_type: CONTENT_TYPE_TEXT.to_string(),
            last_modified: 0,
            is_listening: false,
            initialized: false,
            refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Lock serializing refreshes of this key.
    pub fn refresh_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_lock.clone()
    }

    /// Store a fetched value, or mark the key absent with `None`.
    /// Returns `true` if the fingerprint changed.
    pub fn apply(&mut self, fetched: Option<FetchedConfig>) -> bool {
        self.initialized = true;
        let Some(fetched) = fetched else {
            let changed = !self.md5.is_empty();
            self.content.clear();
            self.md5.clear();
            self.server_md5.clear();
            self.encrypted_data_key.clear();
            self.last_modified = chrono::Utc::now().timestamp_millis();
            return changed;
        };

        let new_md5 = compute_md5(&fetched.content);
        let changed = new_md5 != self.md5;
        self.content = fetched.content;
        self.md5 = new_md5;
        self.server_md5 = fetched.server_md5;
        self.encrypted_data_key = fetched.encrypted_data_key;
        if !fetched.content_type.is_empty() {
            self.content_type = fetched.content_type;
        }
        self.last_modified = if fetched.last_modified > 0 {
            fetched.last_modified
        } else {
            chrono::Utc::now().timestamp_millis()
        };
        changed
    }

    pub fn exists(&self) -> bool {
        !self.md5.is_empty()
    }

    pub fn to_entry(&self) -> ConfigEntry {
        ConfigEntry {
            key: self.key.clone(),
            content: self.content.clone(),
            fingerprint: self.md5.clone(),
            encrypted_data_key: (!self.encrypted_data_key.is_empty())
                .then(|| self.encrypted_data_key.clone()),
            content_type: self.content_type.clone(),
            last_modified: self.last_modified,
        }
    }
}

/// Compute MD5 hash of a string, returning the hex digest.
pub fn compute_md5(content: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(content.as_bytes());
    const_hex::encode(hasher.finalize())
}
