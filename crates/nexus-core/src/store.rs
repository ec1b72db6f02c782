//! Key-value persistence surface.

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Keys under which orchestrator state is persisted.
pub mod keys {
    pub const STORED_SESSIONS: &str = "nexus.sessions";
    pub const SELECTED_AGENT: &str = "nexus.selectedAgent";
    pub const SELECTED_MODE: &str = "nexus.selectedMode";
    pub const SELECTED_MODEL: &str = "nexus.selectedModel";
}

/// Persistent JSON key-value storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Reads `key` as `T`, falling back to `default` when it is absent.
///
/// # Errors
///
/// Returns a serialization error when the stored value has the wrong shape.
pub async fn load_or<T>(store: &dyn KeyValueStore, key: &str, default: T) -> Result<T>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(default),
    }
}

pub async fn save_value<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    store.set(key, serde_json::to_value(value)?).await
}
