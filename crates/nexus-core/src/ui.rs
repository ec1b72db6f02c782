//! Outbound events for the rendering layer and inbound user commands.

use crate::agent::AgentSummary;
use crate::attachment::Attachment;
use crate::message::Message;
use crate::protocol::{AvailableCommand, ConnectionState, PlanEntry, SessionMetadata};
use crate::stored_session::StoredSession;
use crate::tool::ToolStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Event produced by the orchestrator for one session's view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum UiEvent {
    ConnectionState {
        state: ConnectionState,
    },
    UserMessage {
        text: String,
        attachments: Vec<Attachment>,
    },
    StreamStart,
    StreamChunk {
        text: String,
    },
    ThinkingChunk {
        text: String,
    },
    StreamEnd {
        stop_reason: String,
        html: String,
    },
    ToolCallStart {
        tool_call_id: String,
        name: String,
        kind: Option<String>,
    },
    ToolCallComplete {
        tool_call_id: String,
        name: String,
        kind: Option<String>,
        status: ToolStatus,
        input: Option<String>,
        output: Option<String>,
    },
    SessionMetadata(SessionMetadata),
    AgentError {
        text: String,
    },
    Error {
        text: String,
    },
    Sessions {
        sessions: Vec<StoredSession>,
    },
    Agents {
        agents: Vec<AgentSummary>,
        selected: Option<String>,
    },
    AgentChanged {
        agent_id: String,
        agent_name: String,
    },
    ModeUpdate {
        mode_id: String,
    },
    AvailableCommands {
        commands: Vec<AvailableCommand>,
    },
    Plan {
        entries: Vec<PlanEntry>,
    },
    ChatCleared,
    MessageFinalized {
        message: Message,
    },
    SessionLoaded {
        stored_session_id: String,
        agent_id: Option<String>,
        messages: Vec<Message>,
    },
}

/// A [`UiEvent`] addressed to one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiEnvelope {
    pub session_id: String,
    pub event: UiEvent,
}

/// Sending half of the UI event channel, shared by all sessions.
#[derive(Debug, Clone)]
pub struct UiSink {
    sender: mpsc::UnboundedSender<UiEnvelope>,
}

impl UiSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UiEnvelope>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Delivers an event. A closed receiver means no view is attached.
    pub fn send(&self, session_id: &str, event: UiEvent) {
        let envelope = UiEnvelope {
            session_id: session_id.to_string(),
            event,
        };
        if self.sender.send(envelope).is_err() {
            tracing::trace!("[UiSink] No receiver for session {}", session_id);
        }
    }
}

/// Command issued by the user for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionCommand {
    SendMessage {
        text: String,
        #[serde(default)]
        attachments: Vec<Attachment>,
    },
    SelectAgent {
        agent_id: String,
    },
    SelectMode {
        mode_id: String,
    },
    SelectModel {
        model_id: String,
    },
    Connect,
    NewChat,
    ClearChat,
    /// The view attached and wants its initial state.
    Ready,
    GetSessions,
    DeleteSession {
        stored_session_id: String,
    },
    LoadSession {
        stored_session_id: String,
    },
}
