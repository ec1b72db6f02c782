//! Domain model of the Nexus agent session orchestrator.
//!
//! Everything here is free of I/O: the tool tree, the transcript reducer,
//! stderr classification, prompt assembly and the traits the runtime crates
//! implement (protocol client, key-value store, agent directory, renderer).

pub mod agent;
pub mod attachment;
pub mod config;
pub mod error;
pub mod message;
pub mod protocol;
pub mod render;
pub mod stderr;
pub mod store;
pub mod stored_session;
pub mod tool;
pub mod transcript;
pub mod ui;

// Re-export common error type
pub use error::{NexusError, Result};
