//! Config change listener trait

use super::cache::ConfigEntry;

/// Trait for receiving config change notifications.
///
/// Implement this trait to be notified when a config value changes on the
/// server. A deleted config is delivered as an entry with empty content
/// (`ConfigEntry::exists` returns `false`).
///
/// Handlers must be idempotent: a change is delivered at least once, and
/// the full resync after a reconnect may deliver the same value again.
pub trait ConfigChangeListener: Send + Sync + 'static {
    /// Called when the config content has changed.
    fn receive_config_info(&self, config_info: ConfigEntry);
}

/// A simple listener that invokes a closure.
pub struct FnConfigChangeListener<F>
where
    F: Fn(ConfigEntry) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnConfigChangeListener<F>
where
    F: Fn(ConfigEntry) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ConfigChangeListener for FnConfigChangeListener<F>
where
    F: Fn(ConfigEntry) + Send + Sync + 'static,
{
    fn receive_config_info(&self, config_info: ConfigEntry) {
        (self.f)(config_info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batata_sdk_api::config::ConfigKey;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_fn_listener() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let listener = FnConfigChangeListener::new(move |info: ConfigEntry| {
            seen_clone.lock().unwrap().push(info.content);
        });

        listener.receive_config_info(ConfigEntry {
            key: ConfigKey::new("test-id", "DEFAULT_GROUP", ""),
            content: "test content".to_string(),
            fingerprint: "md5".to_string(),
            encrypted_data_key: None,
            content_type: "text".to_string(),
            last_modified: 0,
        });

        assert_eq!(*seen.lock().unwrap(), vec!["test content"]);
    }

    #[test]
    fn test_idempotent_handler_tolerates_redelivery() {
        let state = Arc::new(Mutex::new(HashMap::new()));
        let state_clone = state.clone();
        let listener = FnConfigChangeListener::new(move |info: ConfigEntry| {
            state_clone
                .lock()
                .unwrap()
                .insert(info.key.clone(), info.fingerprint.clone());
        });

        let entry = ConfigEntry {
            key: ConfigKey::new("app", "G", ""),
            content: "v1".to_string(),
            fingerprint: "f1".to_string(),
            encrypted_data_key: None,
            content_type: "text".to_string(),
            last_modified: 1,
        };
        listener.receive_config_info(entry.clone());
        listener.receive_config_info(entry);

        let state = state.lock().unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(state.values().next().map(String::as_str), Some("f1"));
    }
}
