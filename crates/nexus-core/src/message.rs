//! Finalized transcript entries.

use crate::attachment::Attachment;
use crate::tool::ToolMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageKind {
    User,
    Assistant,
    Error,
    System,
}

/// A transcript entry. Immutable once the reducer has finalized it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_html: Option<String>,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolMap>,
}

impl Message {
    pub fn new(kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            text: text.into(),
            rendered_html: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            attachments: None,
            tools: None,
        }
    }

    pub fn user(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        let mut message = Self::new(MessageKind::User, text);
        if !attachments.is_empty() {
            message.attachments = Some(attachments);
        }
        message
    }

    /// Assistant reply; an empty tool map is stored as `None`.
    pub fn assistant(text: impl Into<String>, rendered_html: Option<String>, tools: ToolMap) -> Self {
        let mut message = Self::new(MessageKind::Assistant, text);
        message.rendered_html = rendered_html;
        if !tools.is_empty() {
            message.tools = Some(tools);
        }
        message
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Error, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(MessageKind::System, text)
    }

    /// True for an assistant message that only carries tool activity.
    pub fn is_tool_only(&self) -> bool {
        self.kind == MessageKind::Assistant
            && self.text.is_empty()
            && self.tools.as_ref().is_some_and(|tools| !tools.is_empty())
    }
}
