//! Configuration store
//!
//! Provides `ConfigStore` for config reads, publishes and removals, config
//! listening, server push handling and periodic reconciliation.

pub mod cache;
pub mod filter;
pub mod listener;

use std::sync::{Arc, Weak};

use batata_sdk_api::config::{
    ConfigBatchListenRequest, ConfigChangeBatchListenResponse, ConfigChangeNotifyRequest,
    ConfigChangeNotifyResponse, ConfigKey, ConfigListenContext, ConfigPublishRequest,
    ConfigPublishResponse, ConfigQueryRequest, ConfigQueryResponse, ConfigRemoveRequest,
    ConfigRemoveResponse,
};
use batata_sdk_api::model::CONTENT_TYPE_KEY;
use batata_sdk_api::remote::{Payload, RequestTrait};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, Result};
use crate::listener_hub::ListenerHub;
use crate::session::{ServerPushHandler, SessionManager, build_ack, decode_push};

use self::cache::{CacheData, FetchedConfig, compute_md5};
use self::filter::{ConfigRequest, ConfigResponse, InterceptorChain};

pub use self::cache::ConfigEntry;
pub use self::listener::{ConfigChangeListener, FnConfigChangeListener};

const METRICS_MODULE: &str = "config";

type ConfigHub = ListenerHub<ConfigKey, dyn ConfigChangeListener, ConfigEntry>;

/// Per-key configuration cache kept in sync with the server.
pub struct ConfigStore {
    session: Arc<SessionManager>,
    cache_map: DashMap<ConfigKey, CacheData>,
    hub: ConfigHub,
    interceptors: InterceptorChain,
    /// Serializes listener add/remove transitions per key
    watch_locks: DashMap<ConfigKey, Arc<tokio::sync::Mutex<()>>>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigStore {
    /// Create the store and register its push handler on the session.
    pub fn new(session: Arc<SessionManager>, interceptors: InterceptorChain) -> Arc<Self> {
        let hub: ConfigHub = ListenerHub::new(
            "config",
            Arc::new(
                |listener: &(dyn ConfigChangeListener + 'static), entry: &ConfigEntry| {
                    listener.receive_config_info(entry.clone())
                },
            ),
        );

        let store = Arc::new(Self {
            session,
            cache_map: DashMap::new(),
            hub,
            interceptors,
            watch_locks: DashMap::new(),
            sync_task: Mutex::new(None),
        });

        store.session.register_push_handler(
            "ConfigChangeNotifyRequest",
            Arc::new(ConfigChangeNotifyHandler::new(store.clone())),
        );
        store.start_reconciliation();

        store
    }

    /// A key in the client's namespace.
    pub fn key(&self, data_id: &str, group: &str) -> ConfigKey {
        ConfigKey::new(data_id, group, self.session.namespace())
    }

    /// Get a config value.
    pub async fn get(&self, key: &ConfigKey) -> Result<String> {
        self.get_detailed(key).await.map(|entry| entry.content)
    }

    /// Get a config value with its metadata.
    ///
    /// Watched keys are served from the cache while the session is
    /// connected; other reads go to the server. When the server cannot be
    /// reached, a cached value is returned instead of the error.
    pub async fn get_detailed(&self, key: &ConfigKey) -> Result<ConfigEntry> {
        validate_key(key)?;

        if self.session.is_connected()
            && let Some(cached) = self.cached(key, |c| c.is_listening && c.initialized)
        {
            return existing(cached);
        }

        match self.refresh_key(key).await {
            Ok(entry) => Ok(entry),
            Err(e) if e.is_connectivity() => match self.cached(key, |c| c.initialized) {
                Some(cached) => {
                    debug!("Serving cached config {} while offline: {}", key, e);
                    existing(cached)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Fetch a config from the server, notifying listeners if it changed.
    pub async fn refresh(&self, key: &ConfigKey) -> Result<ConfigEntry> {
        validate_key(key)?;
        self.refresh_key(key).await
    }

    /// Publish (create or update) a config.
    pub async fn publish(&self, key: &ConfigKey, content: &str) -> Result<bool> {
        self.publish_inner(key, content, None, None).await
    }

    /// Publish a config with an explicit content type (text, json, yaml, ...).
    pub async fn publish_with_type(
        &self,
        key: &ConfigKey,
        content: &str,
        content_type: &str,
    ) -> Result<bool> {
        self.publish_inner(key, content, None, Some(content_type))
            .await
    }

    /// Publish only if the stored content still has MD5 `cas_md5`.
    pub async fn publish_cas(&self, key: &ConfigKey, content: &str, cas_md5: &str) -> Result<bool> {
        self.publish_inner(key, content, Some(cas_md5), None).await
    }

    /// Remove a config from the server.
    pub async fn remove(&self, key: &ConfigKey) -> Result<bool> {
        validate_key(key)?;
        let resp: ConfigRemoveResponse = self
            .session
            .request(ConfigRemoveRequest::for_key(key))
            .await?;
        info!("Removed config {}", key);
        Ok(resp.response.success)
    }

    /// Add a listener for config changes.
    ///
    /// The first listener of a key loads its current value and starts a
    /// server-side watch; the new listener is only called for later changes.
    /// The listener is registered before the watch starts so a change pushed
    /// while the watch request is in flight still reaches it.
    pub async fn add_listener(
        &self,
        key: &ConfigKey,
        listener: Arc<dyn ConfigChangeListener>,
    ) -> Result<()> {
        validate_key(key)?;

        let lock = self.watch_lock(key);
        let _guard = lock.lock().await;

        let should_listen = {
            let mut cache = self
                .cache_map
                .entry(key.clone())
                .or_insert_with(|| CacheData::new(key.clone()));
            let should_listen = !cache.is_listening;
            cache.is_listening = true;
            should_listen
        };

        let count = self.hub.register(key.clone(), listener.clone());

        if should_listen && let Err(e) = self.start_watch(key).await {
            let remaining = self.hub.unregister(key, &listener).unwrap_or(0);
            if remaining == 0
                && let Some(mut cache) = self.cache_map.get_mut(key)
            {
                cache.is_listening = false;
            }
            return Err(e);
        }

        if should_listen {
            debug!("Started listening for config {}", key);
        }
        self.session
            .metrics()
            .update_listener_count(METRICS_MODULE, &key.group_key(), count);

        Ok(())
    }

    /// Remove a listener. The last removal for a key stops the
    /// server-side watch; if that request fails the listener stays
    /// registered and the error is returned so the call can be retried.
    pub async fn remove_listener(
        &self,
        key: &ConfigKey,
        listener: &Arc<dyn ConfigChangeListener>,
    ) -> Result<()> {
        let lock = self.watch_lock(key);
        let _guard = lock.lock().await;

        if !self.hub.is_registered(key, listener) {
            return Ok(());
        }

        if self.hub.listener_count(key) == 1 {
            let md5 = self
                .cache_map
                .get(key)
                .map(|c| c.server_md5.clone())
                .unwrap_or_default();
            let _: ConfigChangeBatchListenResponse = self
                .session
                .request(ConfigBatchListenRequest::new(
                    false,
                    vec![ConfigListenContext::new(key, md5)],
                ))
                .await?;
            if let Some(mut cache) = self.cache_map.get_mut(key) {
                cache.is_listening = false;
            }
            debug!("Stopped listening for config {}", key);
        }

        let remaining = self.hub.unregister(key, listener).unwrap_or(0);
        self.session
            .metrics()
            .update_listener_count(METRICS_MODULE, &key.group_key(), remaining);

        Ok(())
    }

    pub fn listener_count(&self, key: &ConfigKey) -> usize {
        self.hub.listener_count(key)
    }

    /// Re-check every watched key against the server and refresh the ones
    /// that changed. Runs periodically and after every reconnect.
    pub async fn reconcile(&self) -> Result<()> {
        let contexts: Vec<ConfigListenContext> = self
            .cache_map
            .iter()
            .filter(|cache| cache.is_listening)
            .map(|cache| ConfigListenContext::new(&cache.key, cache.server_md5.clone()))
            .collect();

        if contexts.is_empty() {
            return Ok(());
        }

        let watched = contexts.len();
        let resp: ConfigChangeBatchListenResponse = self
            .session
            .request(ConfigBatchListenRequest::new(true, contexts))
            .await?;

        debug!(
            "Reconciled {} watched configs, {} changed",
            watched,
            resp.changed_configs.len()
        );

        self.refresh_changed(resp).await;
        Ok(())
    }

    /// Re-establish all config watches (called after reconnect).
    pub async fn redo_listeners(&self) -> Result<()> {
        self.reconcile().await
    }

    /// Stop reconciliation and listener dispatch.
    pub fn shutdown(&self) {
        if let Some(task) = self.sync_task.lock().take() {
            task.abort();
        }
        self.hub.shutdown();
    }

    /// Handle a `ConfigChangeNotifyRequest` from the server.
    async fn handle_config_change_notify(&self, key: ConfigKey) {
        let watched = self
            .cache_map
            .get(&key)
            .map(|c| c.is_listening)
            .unwrap_or(false);
        if !watched {
            debug!("Ignoring change notification for unwatched config {}", key);
            return;
        }

        info!("Config change notification: {}", key);
        match self.refresh_key(&key).await {
            Ok(_) | Err(ClientError::ConfigNotFound(_)) => {}
            Err(e) => error!("Failed to refresh config {} on change notify: {}", key, e),
        }
    }

    fn cached(&self, key: &ConfigKey, usable: impl Fn(&CacheData) -> bool) -> Option<ConfigEntry> {
        self.cache_map
            .get(key)
            .filter(|c| usable(c.value()))
            .map(|c| c.to_entry())
    }

    /// Load the current value without notifying, then register the watch.
    /// Keys the server reports as already changed are refreshed.
    async fn start_watch(&self, key: &ConfigKey) -> Result<()> {
        match self.refresh_key_quietly(key).await {
            Ok(_) | Err(ClientError::ConfigNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let md5 = self
            .cache_map
            .get(key)
            .map(|c| c.server_md5.clone())
            .unwrap_or_default();
        let resp: ConfigChangeBatchListenResponse = self
            .session
            .request(ConfigBatchListenRequest::new(
                true,
                vec![ConfigListenContext::new(key, md5)],
            ))
            .await?;

        self.refresh_changed(resp).await;
        Ok(())
    }

    async fn refresh_changed(&self, resp: ConfigChangeBatchListenResponse) {
        for changed in resp.changed_configs {
            let key = changed.key();
            if let Err(e) = self.refresh_key(&key).await
                && !matches!(e, ClientError::ConfigNotFound(_))
            {
                warn!("Failed to refresh changed config {}: {}", key, e);
            }
        }
    }

    /// Fetch, verify, intercept and store one key. Refreshes of one key are
    /// serialized; listeners are notified only when the fingerprint changes.
    async fn refresh_key(&self, key: &ConfigKey) -> Result<ConfigEntry> {
        self.refresh_key_with(key, true).await
    }

    async fn refresh_key_quietly(&self, key: &ConfigKey) -> Result<ConfigEntry> {
        self.refresh_key_with(key, false).await
    }

    async fn refresh_key_with(&self, key: &ConfigKey, notify: bool) -> Result<ConfigEntry> {
        let lock = self
            .cache_map
            .entry(key.clone())
            .or_insert_with(|| CacheData::new(key.clone()))
            .refresh_lock();
        let _guard = lock.lock().await;

        let fetched = self.fetch(key).await?;
        let found = fetched.is_some();

        let (changed, entry) = {
            let mut cache = self
                .cache_map
                .entry(key.clone())
                .or_insert_with(|| CacheData::new(key.clone()));
            let changed = cache.apply(fetched);
            (changed, cache.to_entry())
        };

        if notify && changed && self.hub.listener_count(key) > 0 {
            debug!("Config {} changed, fingerprint={}", key, entry.fingerprint);
            self.hub.dispatch(key.clone(), entry.clone());
        }

        if found {
            Ok(entry)
        } else {
            Err(ClientError::ConfigNotFound(key.clone()))
        }
    }

    /// Query the server. `None` means the key does not exist.
    async fn fetch(&self, key: &ConfigKey) -> Result<Option<FetchedConfig>> {
        let resp: ConfigQueryResponse = match self
            .session
            .request(ConfigQueryRequest::for_key(key))
            .await
        {
            Ok(resp) => resp,
            Err(ClientError::ServerError { code, .. })
                if code == ConfigQueryResponse::CONFIG_NOT_FOUND =>
            {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let local = compute_md5(&resp.content);
        if !resp.md5.is_empty() && resp.md5 != local {
            return Err(ClientError::FingerprintMismatch {
                key: key.clone(),
                server: resp.md5,
                local,
            });
        }

        let intercepted = self
            .interceptors
            .inbound_blocking(ConfigResponse::new(
                key,
                resp.content,
                resp.encrypted_data_key,
            ))
            .await?;

        Ok(Some(FetchedConfig {
            content: intercepted.content,
            server_md5: local,
            encrypted_data_key: intercepted.encrypted_data_key,
            content_type: resp.content_type,
            last_modified: resp.last_modified,
        }))
    }

    async fn publish_inner(
        &self,
        key: &ConfigKey,
        content: &str,
        cas_md5: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<bool> {
        validate_key(key)?;

        let outbound = self
            .interceptors
            .outbound(ConfigRequest::new(key, content))?;

        let mut req = ConfigPublishRequest::for_key(key, outbound.content);
        req.encrypted_data_key = outbound.encrypted_data_key;
        if let Some(cas_md5) = cas_md5 {
            req.cas_md5 = cas_md5.to_string();
        }
        if let Some(content_type) = content_type {
            req.addition_map
                .insert(CONTENT_TYPE_KEY.to_string(), content_type.to_string());
        }

        match self
            .session
            .request::<_, ConfigPublishResponse>(req)
            .await
        {
            Ok(resp) => {
                info!("Published config {}", key);
                Ok(resp.response.success)
            }
            Err(ClientError::ServerError { code, message })
                if code == ConfigPublishResponse::CAS_CONFLICT =>
            {
                Err(ClientError::ConflictError(format!("{}: {}", key, message)))
            }
            Err(e) => Err(e),
        }
    }

    fn watch_lock(&self, key: &ConfigKey) -> Arc<tokio::sync::Mutex<()>> {
        self.watch_locks.entry(key.clone()).or_default().clone()
    }

    fn start_reconciliation(self: &Arc<Self>) {
        let interval = self.session.props().config_sync_interval();
        let weak: Weak<Self> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                if !store.session.is_connected() {
                    continue;
                }
                if let Err(e) = store.reconcile().await {
                    warn!("Config reconciliation failed: {}", e);
                }
            }
        });

        *self.sync_task.lock() = Some(task);
    }
}

impl Drop for ConfigStore {
    fn drop(&mut self) {
        if let Some(task) = self.sync_task.lock().take() {
            task.abort();
        }
    }
}

fn validate_key(key: &ConfigKey) -> Result<()> {
    if key.data_id.trim().is_empty() {
        return Err(ClientError::InvalidArgument("dataId must not be empty".to_string()));
    }
    if key.group.trim().is_empty() {
        return Err(ClientError::InvalidArgument("group must not be empty".to_string()));
    }
    Ok(())
}

fn existing(entry: ConfigEntry) -> Result<ConfigEntry> {
    if entry.exists() {
        Ok(entry)
    } else {
        Err(ClientError::ConfigNotFound(entry.key))
    }
}

/// Server push handler for `ConfigChangeNotifyRequest`.
///
/// Acknowledges immediately and refreshes the key on a separate task.
pub struct ConfigChangeNotifyHandler {
    config_store: Arc<ConfigStore>,
}

impl ConfigChangeNotifyHandler {
    pub fn new(config_store: Arc<ConfigStore>) -> Self {
        Self { config_store }
    }
}

impl ServerPushHandler for ConfigChangeNotifyHandler {
    fn handle(&self, payload: &Payload) -> Option<Payload> {
        let req: ConfigChangeNotifyRequest = decode_push(payload)?;
        let key = req.key();

        let store = self.config_store.clone();
        tokio::spawn(async move {
            store.handle_config_change_notify(key).await;
        });

        build_ack(ConfigChangeNotifyResponse::new(), req.request_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key(&ConfigKey::new("id", "group", "")).is_ok());
        assert!(matches!(
            validate_key(&ConfigKey::new("", "group", "")),
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_key(&ConfigKey::new("id", " ", "")),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_existing_rejects_absent_entry() {
        let mut cache = CacheData::new(ConfigKey::new("id", "group", ""));
        cache.apply(None);
        assert!(matches!(
            existing(cache.to_entry()),
            Err(ClientError::ConfigNotFound(_))
        ));
    }
}
