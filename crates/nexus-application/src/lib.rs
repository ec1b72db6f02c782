//! Runtime layer for Nexus.
//!
//! Drives agent sessions: buffering streamed output, connecting and
//! reconnecting agents, persisting conversations, and routing commands and
//! events between views and their sessions.

pub mod bootstrap;
pub mod coalescer;
pub mod lifecycle;
pub mod logging;
pub mod preferences;
pub mod registry;
pub mod stored_sessions;

#[cfg(test)]
mod test_support;

pub use bootstrap::{NexusRuntime, StartOptions, start};
pub use lifecycle::{SessionLifecycle, SessionServices, TurnOutcome};
pub use registry::SessionRegistry;
pub use stored_sessions::StoredSessionService;
pub use preferences::PreferenceService;
