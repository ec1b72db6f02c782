//! Streaming transcript reducer.
//!
//! A [`Transcript`] is the finalized message list plus one in-flight
//! [`StreamingState`]. Every input is a [`TranscriptEvent`]; [`Transcript::apply`]
//! folds it in and reports which messages it finalized.
//!
//! Prose and tool activity become separate messages: a tool group closes
//! before new prose starts, and pending prose closes before a new tool group
//! starts, so messages stay in chronological order.

use crate::attachment::Attachment;
use crate::message::Message;
use crate::tool::{ToolMap, ToolPatch, ToolStatus, ToolTree};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The in-flight part of a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingState {
    pub current_text: String,
    pub thinking_text: String,
    pub tools: ToolMap,
    pub has_active_tool: bool,
}

impl StreamingState {
    pub fn is_empty(&self) -> bool {
        self.current_text.is_empty()
            && self.thinking_text.is_empty()
            && self.tools.is_empty()
            && !self.has_active_tool
    }

    fn has_pending_text(&self) -> bool {
        !self.current_text.trim().is_empty()
    }
}

/// Input to the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    TurnStarted,
    TextDelta(String),
    ThoughtDelta(String),
    ToolStarted { id: String, patch: ToolPatch },
    ToolUpdated { id: String, patch: ToolPatch },
    /// Coalesced tool activity, applied in map order.
    ToolBatch(IndexMap<String, ToolPatch>),
    TurnEnded { html: Option<String> },
    UserMessage {
        text: String,
        attachments: Vec<Attachment>,
    },
    Error(String),
    System(String),
    Cleared,
}

/// Finalized messages plus the in-flight turn of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub messages: Vec<Message>,
    pub streaming: StreamingState,
    pub thinking: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from previously stored messages.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Applies one event and returns the messages it finalized, in order.
    pub fn apply(&mut self, event: TranscriptEvent) -> Vec<Message> {
        let mut finalized = Vec::new();
        match event {
            TranscriptEvent::TurnStarted => {
                self.streaming = StreamingState::default();
                self.thinking = true;
            }
            TranscriptEvent::TextDelta(text) => self.on_text(text, &mut finalized),
            TranscriptEvent::ThoughtDelta(text) => {
                self.streaming.thinking_text.push_str(&text);
            }
            TranscriptEvent::ToolStarted { id, patch } => {
                self.on_tool_started(&id, &patch, &mut finalized)
            }
            TranscriptEvent::ToolUpdated { id, patch } => {
                self.streaming
                    .tools
                    .upsert_tool(&id, &patch, ToolStatus::Pending);
            }
            TranscriptEvent::ToolBatch(batch) => self.on_tool_batch(batch, &mut finalized),
            TranscriptEvent::TurnEnded { html } => self.on_turn_ended(html, &mut finalized),
            TranscriptEvent::UserMessage { text, attachments } => {
                self.push(Message::user(text, attachments), &mut finalized)
            }
            TranscriptEvent::Error(text) => self.push(Message::error(text), &mut finalized),
            TranscriptEvent::System(text) => self.push(Message::system(text), &mut finalized),
            TranscriptEvent::Cleared => {
                self.messages.clear();
                self.streaming = StreamingState::default();
                self.thinking = false;
            }
        }
        finalized
    }

    fn on_text(&mut self, text: String, finalized: &mut Vec<Message>) {
        if self.streaming.has_active_tool && !self.streaming.tools.is_empty() {
            let tools = std::mem::take(&mut self.streaming.tools);
            self.streaming = StreamingState::default();
            self.push(Message::assistant("", None, tools), finalized);
        }
        self.streaming.current_text.push_str(&text);
    }

    fn on_tool_started(&mut self, id: &str, patch: &ToolPatch, finalized: &mut Vec<Message>) {
        if self.streaming.has_pending_text() {
            self.finalize_text(finalized);
        }
        self.streaming.tools.upsert_tool(id, patch, ToolStatus::Running);
        self.streaming.has_active_tool = true;
    }

    fn on_tool_batch(&mut self, batch: IndexMap<String, ToolPatch>, finalized: &mut Vec<Message>) {
        if batch.is_empty() {
            return;
        }
        if self.streaming.has_pending_text() {
            self.finalize_text(finalized);
        }
        for (id, patch) in &batch {
            self.streaming.tools.upsert_tool(id, patch, ToolStatus::Pending);
        }
        self.streaming.has_active_tool = true;
    }

    fn on_turn_ended(&mut self, html: Option<String>, finalized: &mut Vec<Message>) {
        let streaming = std::mem::take(&mut self.streaming);
        self.thinking = false;

        let text = streaming.current_text.trim();
        if !text.is_empty() || html.is_some() || !streaming.tools.is_empty() {
            self.push(
                Message::assistant(text, html, streaming.tools),
                finalized,
            );
        }
    }

    /// Closes pending prose as its own message and resets the in-flight state.
    fn finalize_text(&mut self, finalized: &mut Vec<Message>) {
        let streaming = std::mem::take(&mut self.streaming);
        let text = streaming.current_text.trim().to_string();
        self.push(Message::assistant(text, None, ToolMap::new()), finalized);
    }

    fn push(&mut self, message: Message, finalized: &mut Vec<Message>) {
        finalized.push(message.clone());
        self.messages.push(message);
    }
}

/// Value-in, value-out form of [`Transcript::apply`].
pub fn reduce(mut transcript: Transcript, event: TranscriptEvent) -> Transcript {
    transcript.apply(event);
    transcript
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use crate::tool::UNKNOWN_TOOL_NAME;
    use proptest::prelude::*;

    fn text(s: &str) -> TranscriptEvent {
        TranscriptEvent::TextDelta(s.to_string())
    }

    fn started(id: &str, name: &str) -> TranscriptEvent {
        TranscriptEvent::ToolStarted {
            id: id.to_string(),
            patch: ToolPatch::named(name),
        }
    }

    fn updated(id: &str, patch: ToolPatch) -> TranscriptEvent {
        TranscriptEvent::ToolUpdated {
            id: id.to_string(),
            patch,
        }
    }

    fn ended() -> TranscriptEvent {
        TranscriptEvent::TurnEnded { html: None }
    }

    fn run(events: Vec<TranscriptEvent>) -> Transcript {
        events.into_iter().fold(Transcript::new(), reduce)
    }

    #[test]
    fn test_hello_world_turn() {
        let transcript = run(vec![
            TranscriptEvent::TurnStarted,
            text("Hello "),
            text("world"),
            ended(),
        ]);

        assert_eq!(transcript.messages.len(), 1);
        assert_eq!(transcript.messages[0].kind, MessageKind::Assistant);
        assert_eq!(transcript.messages[0].text, "Hello world");
        assert!(transcript.streaming.is_empty());
        assert!(!transcript.thinking);
    }

    #[test]
    fn test_tool_then_text_turn() {
        let transcript = run(vec![
            TranscriptEvent::TurnStarted,
            started("t1", "Read"),
            updated(
                "t1",
                ToolPatch::default()
                    .with_status(ToolStatus::Completed)
                    .with_output("ok"),
            ),
            text("Done"),
            ended(),
        ]);

        assert_eq!(transcript.messages.len(), 2);
        let tool_message = &transcript.messages[0];
        assert!(tool_message.is_tool_only());
        let t1 = &tool_message.tools.as_ref().unwrap()["t1"];
        assert_eq!(t1.name, "Read");
        assert_eq!(t1.status, ToolStatus::Completed);
        assert_eq!(t1.output.as_deref(), Some("ok"));

        assert_eq!(transcript.messages[1].text, "Done");
        assert!(transcript.messages[1].tools.is_none());
    }

    #[test]
    fn test_tool_start_finalizes_pending_text() {
        let mut transcript = Transcript::new();
        transcript.apply(TranscriptEvent::TurnStarted);
        transcript.apply(text("Let me look."));

        let finalized = transcript.apply(started("t1", "Grep"));

        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].text, "Let me look.");
        assert!(finalized[0].tools.is_none());
        assert!(transcript.streaming.current_text.is_empty());
        assert!(transcript.streaming.has_active_tool);
        assert_eq!(transcript.streaming.tools["t1"].status, ToolStatus::Running);
    }

    #[test]
    fn test_whitespace_text_does_not_split_tool_group() {
        let mut transcript = Transcript::new();
        transcript.apply(text("  \n"));
        let finalized = transcript.apply(started("t1", "Grep"));
        assert!(finalized.is_empty());
        assert!(transcript.streaming.tools.contains_key("t1"));
    }

    #[test]
    fn test_text_after_tools_finalizes_tool_only_message() {
        let mut transcript = Transcript::new();
        transcript.apply(started("t1", "Bash"));
        transcript.apply(started("t2", "Edit"));

        let finalized = transcript.apply(text("All set"));

        assert_eq!(finalized.len(), 1);
        assert!(finalized[0].text.is_empty());
        assert_eq!(finalized[0].tools.as_ref().unwrap().len(), 2);
        assert_eq!(transcript.streaming.current_text, "All set");
        assert!(transcript.streaming.tools.is_empty());
        assert!(!transcript.streaming.has_active_tool);
    }

    #[test]
    fn test_unknown_name_keeps_started_name() {
        let transcript = run(vec![
            started("t1", "Bash"),
            updated(
                "t1",
                ToolPatch::named(UNKNOWN_TOOL_NAME).with_status(ToolStatus::Completed),
            ),
        ]);
        let node = &transcript.streaming.tools["t1"];
        assert_eq!(node.name, "Bash");
        assert_eq!(node.status, ToolStatus::Completed);
    }

    #[test]
    fn test_update_without_start_creates_node() {
        let transcript = run(vec![updated(
            "late",
            ToolPatch::named("Write").with_status(ToolStatus::Completed),
        )]);
        assert_eq!(transcript.streaming.tools["late"].name, "Write");
    }

    #[test]
    fn test_empty_turn_end_finalizes_nothing() {
        let mut transcript = Transcript::new();
        transcript.apply(TranscriptEvent::TurnStarted);
        transcript.apply(TranscriptEvent::ThoughtDelta("hmm".to_string()));

        let finalized = transcript.apply(ended());

        assert!(finalized.is_empty());
        assert!(transcript.messages.is_empty());
        assert_eq!(transcript.streaming, StreamingState::default());
    }

    #[test]
    fn test_turn_end_with_html_only() {
        let mut transcript = Transcript::new();
        let finalized = transcript.apply(TranscriptEvent::TurnEnded {
            html: Some("<p></p>".to_string()),
        });
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].rendered_html.as_deref(), Some("<p></p>"));
    }

    #[test]
    fn test_thought_never_finalizes() {
        let mut transcript = Transcript::new();
        transcript.apply(started("t1", "Bash"));
        let finalized = transcript.apply(TranscriptEvent::ThoughtDelta("thinking".into()));
        assert!(finalized.is_empty());
        assert_eq!(transcript.streaming.thinking_text, "thinking");
        assert!(transcript.streaming.has_active_tool);
    }

    #[test]
    fn test_batch_matches_sequential_updates() {
        let mut batch = IndexMap::new();
        batch.insert("a".to_string(), ToolPatch::named("Read"));
        batch.insert(
            "b".to_string(),
            ToolPatch::named("Bash").with_status(ToolStatus::Running),
        );

        let mut batched = Transcript::new();
        batched.apply(started("a", "Read"));
        batched.apply(TranscriptEvent::ToolBatch(batch.clone()));

        let mut sequential = Transcript::new();
        sequential.apply(started("a", "Read"));
        for (id, patch) in batch {
            sequential.apply(updated(&id, patch));
        }

        assert_eq!(batched.streaming.tools, sequential.streaming.tools);
        assert!(batched.streaming.has_active_tool);
    }

    #[test]
    fn test_batch_finalizes_pending_text_first() {
        let mut transcript = Transcript::new();
        transcript.apply(text("Checking"));
        let mut batch = IndexMap::new();
        batch.insert("t1".to_string(), ToolPatch::named("Read"));

        let finalized = transcript.apply(TranscriptEvent::ToolBatch(batch));

        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].text, "Checking");
        assert!(transcript.streaming.tools.contains_key("t1"));
    }

    #[test]
    fn test_subagent_tools_nest_under_task() {
        let transcript = run(vec![
            TranscriptEvent::ToolStarted {
                id: "task".to_string(),
                patch: ToolPatch::named("Task").with_kind("task"),
            },
            TranscriptEvent::ToolStarted {
                id: "read".to_string(),
                patch: ToolPatch::named("Read").with_parent("task"),
            },
            ended(),
        ]);
        let tools = transcript.messages[0].tools.as_ref().unwrap();
        assert_eq!(tools.len(), 1);
        assert!(tools["task"].sub_tools.contains_key("read"));
    }

    #[test]
    fn test_user_error_system_do_not_touch_stream() {
        let mut transcript = Transcript::new();
        transcript.apply(text("partial"));
        transcript.apply(TranscriptEvent::Error("boom".into()));
        transcript.apply(TranscriptEvent::System("note".into()));

        assert_eq!(transcript.streaming.current_text, "partial");
        let kinds: Vec<_> = transcript.messages.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MessageKind::Error, MessageKind::System]);

        transcript.apply(TranscriptEvent::Cleared);
        assert!(transcript.messages.is_empty());
        assert!(transcript.streaming.is_empty());
    }

    proptest! {
        #[test]
        fn prop_text_deltas_concatenate(deltas in prop::collection::vec(".{0,16}", 0..32)) {
            let mut transcript = Transcript::new();
            transcript.apply(TranscriptEvent::TurnStarted);
            for delta in &deltas {
                transcript.apply(TranscriptEvent::TextDelta(delta.clone()));
            }
            prop_assert_eq!(transcript.streaming.current_text, deltas.concat());
            prop_assert!(transcript.messages.is_empty());
        }
    }
}
