//! Configuration model loaded from `config.toml`.
//!
//! ```toml
//! [orchestrator]
//! text_window_ms = 50
//! tool_window_ms = 100
//!
//! [logging]
//! filter = "nexus=debug,info"
//!
//! [[agents]]
//! id = "claude-code"
//! name = "Claude Code"
//! command = "npx"
//! args = ["@zed-industries/claude-code-acp"]
//! ```

use crate::agent::AgentDescriptor;
use crate::stderr::{STDERR_CAP_CHARS, STDERR_RETAIN_CHARS};
use crate::stored_session::MAX_STORED_SESSIONS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    pub orchestrator: OrchestratorConfig,
    pub logging: LoggingConfig,
    /// Agents offered to the user. Built-in defaults apply when empty.
    pub agents: Vec<AgentDescriptor>,
}

/// Timing and capacity knobs for the session orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub text_window_ms: u64,
    pub thought_window_ms: u64,
    pub tool_window_ms: u64,
    /// Pause after connecting from a disconnected or error state.
    pub connect_settle_ms: u64,
    /// Wait applied when a connect is already in progress.
    pub connecting_wait_ms: u64,
    /// Pause after reconnecting to a newly selected agent.
    pub agent_switch_settle_ms: u64,
    /// Delay before re-reading session metadata after session creation.
    pub metadata_refetch_ms: u64,
    pub stderr_cap_chars: usize,
    pub stderr_retain_chars: usize,
    pub max_stored_sessions: usize,
    /// Directory remote sessions are rooted at. Defaults to the process cwd.
    pub working_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            text_window_ms: 50,
            thought_window_ms: 50,
            tool_window_ms: 100,
            connect_settle_ms: 100,
            connecting_wait_ms: 500,
            agent_switch_settle_ms: 200,
            metadata_refetch_ms: 500,
            stderr_cap_chars: STDERR_CAP_CHARS,
            stderr_retain_chars: STDERR_RETAIN_CHARS,
            max_stored_sessions: MAX_STORED_SESSIONS,
            working_dir: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn text_window(&self) -> Duration {
        Duration::from_millis(self.text_window_ms)
    }

    pub fn thought_window(&self) -> Duration {
        Duration::from_millis(self.thought_window_ms)
    }

    pub fn tool_window(&self) -> Duration {
        Duration::from_millis(self.tool_window_ms)
    }

    pub fn connect_settle(&self) -> Duration {
        Duration::from_millis(self.connect_settle_ms)
    }

    pub fn connecting_wait(&self) -> Duration {
        Duration::from_millis(self.connecting_wait_ms)
    }

    pub fn agent_switch_settle(&self) -> Duration {
        Duration::from_millis(self.agent_switch_settle_ms)
    }

    pub fn metadata_refetch(&self) -> Duration {
        Duration::from_millis(self.metadata_refetch_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
    /// Also write a daily rolling log file under the logs directory.
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
            file: false,
        }
    }
}
