//! Persisted conversation history.
//!
//! The stored list is shared by every live session and kept most-recent-first,
//! capped at [`MAX_STORED_SESSIONS`].

use crate::message::{Message, MessageKind};
use serde::{Deserialize, Serialize};

pub const MAX_STORED_SESSIONS: usize = 50;
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";
const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Last touched, Unix milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl StoredSession {
    /// Snapshot of a transcript, titled from its first user message.
    pub fn from_messages(id: impl Into<String>, agent_id: Option<String>, messages: Vec<Message>) -> Self {
        Self {
            id: id.into(),
            title: generate_title(&messages),
            agent_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            messages,
        }
    }
}

/// Title from the first user message: up to 50 characters, "..." when cut.
pub fn generate_title(messages: &[Message]) -> String {
    let Some(first) = messages
        .iter()
        .find(|m| m.kind == MessageKind::User && !m.text.trim().is_empty())
    else {
        return DEFAULT_SESSION_TITLE.to_string();
    };

    let text = first.text.trim();
    if text.chars().count() > TITLE_MAX_CHARS {
        let cut: String = text.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

/// Places `session` first, replacing any entry with the same id, and trims to `cap`.
pub fn upsert_capped(list: &mut Vec<StoredSession>, session: StoredSession, cap: usize) {
    list.retain(|s| s.id != session.id);
    list.insert(0, session);
    list.truncate(cap);
}

/// Removes the entry with `id`. Returns whether anything was removed.
pub fn remove_stored(list: &mut Vec<StoredSession>, id: &str) -> bool {
    let before = list.len();
    list.retain(|s| s.id != id);
    list.len() != before
}
