//! Last-used agent, mode and model.

use nexus_core::error::Result;
use nexus_core::store::{KeyValueStore, keys, load_or, save_value};
use std::sync::Arc;

/// Persisted user selections shared by all sessions.
pub struct PreferenceService {
    store: Arc<dyn KeyValueStore>,
}

impl PreferenceService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn selected_agent(&self) -> Result<Option<String>> {
        self.read(keys::SELECTED_AGENT).await
    }

    pub async fn set_selected_agent(&self, agent_id: &str) -> Result<()> {
        save_value(self.store.as_ref(), keys::SELECTED_AGENT, agent_id).await
    }

    pub async fn selected_mode(&self) -> Result<Option<String>> {
        self.read(keys::SELECTED_MODE).await
    }

    pub async fn set_selected_mode(&self, mode_id: &str) -> Result<()> {
        save_value(self.store.as_ref(), keys::SELECTED_MODE, mode_id).await
    }

    pub async fn selected_model(&self) -> Result<Option<String>> {
        self.read(keys::SELECTED_MODEL).await
    }

    pub async fn set_selected_model(&self, model_id: &str) -> Result<()> {
        save_value(self.store.as_ref(), keys::SELECTED_MODEL, model_id).await
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        load_or(self.store.as_ref(), key, None).await
    }
}
