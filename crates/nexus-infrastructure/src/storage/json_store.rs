//! JSON-file backed key-value store.

use super::atomic_file::{AtomicFile, FileFormat};
use crate::paths::NexusPaths;
use async_trait::async_trait;
use nexus_core::error::{NexusError, Result};
use nexus_core::store::KeyValueStore;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

type Document = Map<String, Value>;

/// Key-value store kept as one JSON object on disk.
///
/// The document is cached in memory; every write replaces the file
/// atomically while holding the cache lock, so writes land in call order.
#[derive(Clone)]
pub struct JsonFileStore {
    cache: Arc<Mutex<Document>>,
    file: AtomicFile<Document>,
}

impl JsonFileStore {
    /// Opens the store at `path`, loading any existing document.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is not a JSON object.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let file = AtomicFile::<Document>::new(path, FileFormat::Json);
        let loader = file.clone();
        let document = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| NexusError::internal(format!("Failed to join task: {}", e)))??
            .unwrap_or_default();

        tracing::debug!(
            "[JsonFileStore] Loaded {} keys from {:?}",
            document.len(),
            file.path()
        );

        Ok(Self {
            cache: Arc::new(Mutex::new(document)),
            file,
        })
    }

    /// Opens `state.json` in the nexus config directory.
    pub async fn open_default(paths: &NexusPaths) -> Result<Self> {
        Self::open(paths.state_file()?).await
    }

    async fn persist(&self, document: Document) -> Result<()> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.save(&document))
            .await
            .map_err(|e| NexusError::internal(format!("Failed to join task: {}", e)))?
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.cache.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut cache = self.cache.lock().await;
        cache.insert(key.to_string(), value);
        self.persist(cache.clone()).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut cache = self.cache.lock().await;
        if cache.remove(key).is_some() {
            self.persist(cache.clone()).await?;
        }
        Ok(())
    }
}
