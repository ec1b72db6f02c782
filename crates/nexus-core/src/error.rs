//! Error types for the Nexus orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message shown when the agent process dies right after a successful connect.
pub const PROCESS_TERMINATED_MESSAGE: &str =
    "Agent process terminated unexpectedly. Please try again.";

/// Message shown when a turn completes without text or tool activity.
pub const NO_RESPONSE_MESSAGE: &str =
    "Agent returned no response. Check the ACP output channel for details.";

/// A shared error type for the entire Nexus workspace.
///
/// Every failure is local to one session. The variants are cloneable and
/// serializable so they can be attached to UI events and compared in tests.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NexusError {
    /// The agent subprocess failed to start or report ready.
    #[error("{0}")]
    ConnectFailure(String),

    /// Connect appeared to succeed but the liveness check failed immediately after.
    #[error("{}", PROCESS_TERMINATED_MESSAGE)]
    ProcessTerminated,

    /// The turn completed with no streamed text and no tool activity.
    #[error("{}", NO_RESPONSE_MESSAGE)]
    NoResponse,

    /// Error classified from the agent's stderr stream.
    #[error("{0}")]
    AgentRuntime(String),

    /// A send was attempted while another turn is still streaming.
    #[error("A turn is already in progress for session '{0}'")]
    TurnInProgress(String),

    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Caller supplied something unusable (e.g. an empty prompt)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Protocol client reported a failure for a request
    #[error("{0}")]
    Protocol(String),

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "TOML", "JSON", etc.
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NexusError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates the ConnectFailure reported when a freshly selected agent does not come up.
    pub fn agent_failed_to_start(agent_id: &str) -> Self {
        Self::ConnectFailure(format!(
            "Agent \"{}\" failed to start. Check if the agent is properly installed.",
            agent_id
        ))
    }

    /// Creates a Protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Creates an InvalidInput error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Creates an IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a connection-level failure (start or liveness).
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::ConnectFailure(_) | Self::ProcessTerminated)
    }

    /// Check if this is a serialization error
    pub fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization { .. })
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for NexusError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for NexusError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for NexusError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for NexusError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// Conversion from anyhow::Error, used where collaborators report opaque failures
impl From<anyhow::Error> for NexusError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Conversion from String (for error messages)
impl From<String> for NexusError {
    fn from(err: String) -> Self {
        Self::Internal(err)
    }
}

/// A type alias for `Result<T, NexusError>`.
pub type Result<T> = std::result::Result<T, NexusError>;
