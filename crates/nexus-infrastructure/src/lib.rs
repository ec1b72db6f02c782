//! Filesystem and process-facing implementations of the nexus-core traits.

pub mod agent_catalog;
pub mod attachment_loader;
pub mod config_service;
pub mod markdown_renderer;
pub mod paths;
pub mod storage;

pub use agent_catalog::ConfiguredAgentCatalog;
pub use config_service::ConfigService;
pub use markdown_renderer::GfmRenderer;
pub use paths::NexusPaths;
pub use storage::{InMemoryStore, JsonFileStore};
