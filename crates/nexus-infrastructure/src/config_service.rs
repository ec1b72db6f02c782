//! Configuration service implementation.
//!
//! Loads [`NexusConfig`] from `config.toml` in the nexus config directory and
//! caches it for the lifetime of the process.

use crate::paths::NexusPaths;
use crate::storage::{AtomicFile, FileFormat};
use nexus_core::config::NexusConfig;
use nexus_core::error::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Configuration service that loads and caches the root configuration.
#[derive(Debug, Clone)]
pub struct ConfigService {
    file: AtomicFile<NexusConfig>,
    /// Cached configuration, filled on first access.
    config: Arc<RwLock<Option<NexusConfig>>>,
}

impl ConfigService {
    pub fn new(path: PathBuf) -> Self {
        Self {
            file: AtomicFile::new(path, FileFormat::Toml),
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Service for the default `config.toml` location.
    pub fn from_paths(paths: &NexusPaths) -> Result<Self> {
        Ok(Self::new(paths.config_file()?))
    }

    /// Gets the configuration, loading from file if not cached.
    ///
    /// A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the file exists but is malformed.
    pub async fn get_config(&self) -> Result<NexusConfig> {
        {
            let cached = self.config.read().await;
            if let Some(config) = cached.as_ref() {
                return Ok(config.clone());
            }
        }

        let mut slot = self.config.write().await;
        if let Some(config) = slot.as_ref() {
            return Ok(config.clone());
        }

        let loaded = match self.file.load()? {
            Some(config) => {
                tracing::info!("[ConfigService] Loaded config from {:?}", self.file.path());
                config
            }
            None => {
                tracing::info!(
                    "[ConfigService] No config at {:?}, using defaults",
                    self.file.path()
                );
                NexusConfig::default()
            }
        };
        *slot = Some(loaded.clone());
        Ok(loaded)
    }

    /// Writes `config` to disk and replaces the cached copy.
    pub async fn save_config(&self, config: NexusConfig) -> Result<()> {
        let mut slot = self.config.write().await;
        self.file.save(&config)?;
        *slot = Some(config);
        Ok(())
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub async fn invalidate_cache(&self) {
        *self.config.write().await = None;
    }
}
