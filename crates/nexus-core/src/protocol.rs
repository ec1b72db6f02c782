//! Capability surface of the agent protocol client.
//!
//! The transport and wire framing live behind [`ProtocolClient`]. The client
//! reports connection changes, session notifications and raw stderr through an
//! [`EventSink`] handed to it by a [`ProtocolClientFactory`].

use crate::agent::AgentDescriptor;
use crate::error::Result;
use crate::tool::{ToolPatch, ToolStatus, UNKNOWN_TOOL_NAME};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connection state of one session's agent process.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    /// States in which any remote session is gone.
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}

/// A prompt content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(other)]
    Unsupported,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Completion of a prompt request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    pub stop_reason: String,
}

impl PromptResponse {
    pub fn new(stop_reason: impl Into<String>) -> Self {
        Self {
            stop_reason: stop_reason.into(),
        }
    }
}

// ============================================================================
// Session metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMode {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionModeState {
    pub current_mode_id: String,
    pub available_modes: Vec<SessionMode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub model_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionModelState {
    pub current_model_id: String,
    pub available_models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableCommand {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    pub content: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub status: String,
}

/// Modes, models and commands the remote session advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub modes: Option<SessionModeState>,
    pub models: Option<SessionModelState>,
    pub commands: Option<Vec<AvailableCommand>>,
}

impl SessionMetadata {
    /// Whether the mode or model lists have arrived.
    pub fn has_selections(&self) -> bool {
        self.modes.is_some() || self.models.is_some()
    }

    pub fn has_mode(&self, mode_id: &str) -> bool {
        self.modes
            .as_ref()
            .is_some_and(|m| m.available_modes.iter().any(|mode| mode.id == mode_id))
    }

    pub fn has_model(&self, model_id: &str) -> bool {
        self.models.as_ref().is_some_and(|m| {
            m.available_models
                .iter()
                .any(|model| model.model_id == model_id)
        })
    }
}

// ============================================================================
// Session notifications
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallContent {
    Content {
        content: ContentBlock,
    },
    Diff {
        path: String,
        #[serde(rename = "oldText", default)]
        old_text: Option<String>,
        #[serde(rename = "newText")]
        new_text: String,
    },
    #[serde(other)]
    Other,
}

/// Fields shared by `tool_call` and `tool_call_update` notifications.
///
/// A start carries at least a title; an update may carry any subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallData {
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ToolCallContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<Value>,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ToolCallData {
    pub fn new(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            ..Default::default()
        }
    }

    /// Display name, `"Unknown"` when the agent sent no title.
    pub fn name(&self) -> &str {
        self.title.as_deref().unwrap_or(UNKNOWN_TOOL_NAME)
    }

    pub fn tool_status(&self) -> Option<ToolStatus> {
        self.status.as_deref().map(ToolStatus::from_protocol)
    }

    /// First text content, falling back to `rawOutput.output`.
    pub fn output_text(&self) -> Option<String> {
        let from_content = self.content.first().and_then(|c| match c {
            ToolCallContent::Content { content } => content.as_text().map(str::to_string),
            _ => None,
        });
        from_content.or_else(|| raw_string(self.raw_output.as_ref(), "output"))
    }

    /// `rawInput.command`, falling back to `rawInput.description`.
    pub fn input_text(&self) -> Option<String> {
        raw_string(self.raw_input.as_ref(), "command")
            .or_else(|| raw_string(self.raw_input.as_ref(), "description"))
    }

    /// Tool call that spawned this one, if the agent reports it in `_meta`.
    pub fn parent_tool_id(&self) -> Option<String> {
        let meta = self.meta.as_ref()?;
        meta.get("parentToolCallId")
            .or_else(|| meta.get("claudeCode").and_then(|c| c.get("parentToolUseId")))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Converts the notification into a tool patch.
    ///
    /// `started` marks a `tool_call` notification, which defaults to running.
    pub fn to_patch(&self, started: bool) -> ToolPatch {
        let name = self.name().to_string();
        let is_task = name == "Task";
        ToolPatch {
            status: self
                .tool_status()
                .or(started.then_some(ToolStatus::Running)),
            kind: self.kind.clone(),
            input: self.input_text(),
            output: self.output_text(),
            agent_type: if is_task {
                raw_string(self.raw_input.as_ref(), "subagent_type")
            } else {
                None
            },
            description: if is_task {
                raw_string(self.raw_input.as_ref(), "description")
            } else {
                None
            },
            parent_id: self.parent_tool_id(),
            name: Some(name),
        }
    }
}

fn raw_string(value: Option<&Value>, key: &str) -> Option<String> {
    value
        .and_then(|v| v.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// One update inside a session notification, tagged by `sessionUpdate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    AgentMessageChunk {
        content: ContentBlock,
    },
    AgentThoughtChunk {
        content: ContentBlock,
    },
    ToolCall(ToolCallData),
    ToolCallUpdate(ToolCallData),
    CurrentModeUpdate {
        #[serde(rename = "currentModeId")]
        current_mode_id: String,
    },
    AvailableCommandsUpdate {
        #[serde(rename = "availableCommands")]
        available_commands: Vec<AvailableCommand>,
    },
    Plan {
        entries: Vec<PlanEntry>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub update: SessionUpdate,
}

impl From<SessionUpdate> for SessionNotification {
    fn from(update: SessionUpdate) -> Self {
        Self {
            session_id: None,
            update,
        }
    }
}

/// Everything a protocol client reports about its agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    StateChanged(ConnectionState),
    SessionUpdate(SessionNotification),
    Stderr(String),
}

/// Where a protocol client delivers its events.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(ProtocolEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new(deliver: impl Fn(ProtocolEvent) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    pub fn emit(&self, event: ProtocolEvent) {
        (self.deliver)(event);
    }

    pub fn state_changed(&self, state: ConnectionState) {
        self.emit(ProtocolEvent::StateChanged(state));
    }

    pub fn session_update(&self, update: SessionUpdate) {
        self.emit(ProtocolEvent::SessionUpdate(update.into()));
    }

    pub fn stderr(&self, text: impl Into<String>) {
        self.emit(ProtocolEvent::Stderr(text.into()));
    }
}

impl From<mpsc::UnboundedSender<ProtocolEvent>> for EventSink {
    fn from(sender: mpsc::UnboundedSender<ProtocolEvent>) -> Self {
        Self::new(move |event| {
            let _ = sender.send(event);
        })
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// Handle to one agent process speaking the session protocol.
///
/// Implementations spawn and frame the transport; the orchestrator only
/// drives this surface. Requests for one session are issued one at a time.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Points the client at a different agent. Takes effect on the next connect.
    fn set_agent(&self, agent: AgentDescriptor);

    /// Starts the agent process and performs the handshake.
    ///
    /// # Errors
    ///
    /// Returns `ConnectFailure` when the process cannot be started or never
    /// reports ready.
    async fn connect(&self) -> Result<()>;

    /// Stops the agent process. Idempotent.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn state(&self) -> ConnectionState;

    /// Creates a remote conversation session rooted at `working_dir`.
    async fn new_session(&self, working_dir: &Path) -> Result<()>;

    /// Sends one prompt and waits for the turn to complete.
    ///
    /// Every notification for the turn is emitted before this resolves.
    async fn send_message(&self, blocks: Vec<ContentBlock>) -> Result<PromptResponse>;

    async fn set_mode(&self, mode_id: &str) -> Result<()>;

    async fn set_model(&self, model_id: &str) -> Result<()>;

    /// Latest metadata for the current remote session, if any has arrived.
    fn session_metadata(&self) -> Option<SessionMetadata>;
}

/// Creates one protocol client per session.
pub trait ProtocolClientFactory: Send + Sync {
    fn create(
        &self,
        agent: Option<AgentDescriptor>,
        events: EventSink,
    ) -> Result<Arc<dyn ProtocolClient>>;
}
