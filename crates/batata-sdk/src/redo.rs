//! Redo service for replaying registrations and subscriptions after reconnect

use std::sync::Arc;

use tracing::{error, info};

use crate::config::ConfigStore;
use crate::error::Result;
use crate::naming::NamingStore;

/// Replays client state after a reconnection.
///
/// A new connection starts without this client's registrations,
/// subscriptions and config watches; `redo_all` re-establishes them.
pub struct RedoService {
    config_store: Option<Arc<ConfigStore>>,
    naming_store: Option<Arc<NamingStore>>,
}

impl RedoService {
    pub fn new(
        config_store: Option<Arc<ConfigStore>>,
        naming_store: Option<Arc<NamingStore>>,
    ) -> Self {
        Self {
            config_store,
            naming_store,
        }
    }

    /// Replay config watches, instance registrations and subscriptions.
    pub async fn redo_all(&self) -> Result<()> {
        info!("Starting redo after reconnect");

        if let Some(config_store) = &self.config_store
            && let Err(e) = config_store.redo_listeners().await
        {
            error!("Failed to redo config listeners: {}", e);
        }

        if let Some(naming_store) = &self.naming_store
            && let Err(e) = naming_store.redo().await
        {
            error!("Failed to redo naming registrations/subscriptions: {}", e);
        }

        info!("Redo complete");
        Ok(())
    }
}
