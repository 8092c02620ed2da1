//! On-disk snapshot cache for service discovery
//!
//! Confirmed service snapshots are written as one JSON file per service so
//! a restarted client can serve instance lists before the server answers.

use std::path::{Path, PathBuf};

use batata_sdk_api::naming::{Service, ServiceKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::cache::compute_md5;
use crate::error::Result;

const FILE_SUFFIX: &str = ".json";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedService {
    key: ServiceKey,
    service: Service,
}

/// Failover reactor persisting confirmed snapshots.
pub struct FailoverReactor {
    base_path: PathBuf,
}

impl FailoverReactor {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Save service info to its cache file.
    pub fn save(&self, key: &ServiceKey, service: &Service) -> Result<()> {
        std::fs::create_dir_all(&self.base_path)?;

        let json = serde_json::to_string_pretty(&CachedService {
            key: key.clone(),
            service: service.clone(),
        })?;
        std::fs::write(self.file_path(key), json)?;

        debug!("Saved snapshot for service: {}", key);
        Ok(())
    }

    /// Load every cached service. Unreadable files are skipped.
    pub fn load_all(&self) -> Result<Vec<(ServiceKey, Service)>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut services = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if !path.is_file() || !path.to_string_lossy().ends_with(FILE_SUFFIX) {
                continue;
            }

            let parsed = std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|content| {
                    serde_json::from_str::<CachedService>(&content).map_err(anyhow::Error::from)
                });
            match parsed {
                Ok(cached) => services.push((cached.key, cached.service)),
                Err(e) => warn!("Skipping unreadable snapshot {}: {}", path.display(), e),
            }
        }

        Ok(services)
    }

    /// One file per key, named by the MD5 of the full key; the key itself
    /// is stored inside the file.
    fn file_path(&self, key: &ServiceKey) -> PathBuf {
        let name = compute_md5(&key.to_string());
        self.base_path.join(format!("{}{}", name, FILE_SUFFIX))
    }
}
