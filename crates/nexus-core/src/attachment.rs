//! User attachments and prompt assembly.
//!
//! A user turn is the typed text plus any attached files, images or code
//! selections. [`build_prompt`] turns that into the content blocks sent to the
//! agent and the plain text shown back in the transcript.

use crate::error::{NexusError, Result};
use crate::protocol::ContentBlock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

const DEFAULT_IMAGE_MIME: &str = "image/png";

/// File extensions loaded as images rather than text.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    File,
    Image,
    Code,
}

/// Something the user attached to a message.
///
/// For images `content` is a data URL (or bare base64); for files and code it
/// is the text itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub kind: AttachmentKind,
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Inclusive 1-based line range of a code selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_range: Option<(u32, u32)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Attachment {
    fn new(kind: AttachmentKind, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            name: name.into(),
            content: content.into(),
            path: None,
            language: None,
            line_range: None,
            mime_type: None,
        }
    }

    pub fn file(path: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let mut attachment = Self::new(AttachmentKind::File, name, content);
        attachment.language = language_for_path(&path);
        attachment.path = Some(path);
        attachment
    }

    pub fn image(name: impl Into<String>, data_url: impl Into<String>, mime_type: Option<String>) -> Self {
        let mut attachment = Self::new(AttachmentKind::Image, name, data_url);
        attachment.mime_type = mime_type;
        attachment
    }

    /// A selection of lines from an open file.
    pub fn code(
        path: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        language: Option<String>,
        line_range: Option<(u32, u32)>,
    ) -> Self {
        let mut attachment = Self::new(AttachmentKind::Code, name, content);
        attachment.path = Some(path.into());
        attachment.language = language;
        attachment.line_range = line_range;
        attachment
    }

    fn display_path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }

    /// Base64 payload of an image, without any data URL prefix.
    fn image_data(&self) -> &str {
        match self.content.split_once(',') {
            Some((_, data)) => data,
            None => &self.content,
        }
    }

    fn to_content_block(&self) -> ContentBlock {
        match self.kind {
            AttachmentKind::Image => ContentBlock::Image {
                data: self.image_data().to_string(),
                mime_type: self
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string()),
            },
            AttachmentKind::Code => {
                let range = self
                    .line_range
                    .map(|(start, end)| format!(" (lines {}-{})", start, end))
                    .unwrap_or_default();
                ContentBlock::text(format!(
                    "```{}\n// File: {}{}\n{}\n```",
                    self.language.as_deref().unwrap_or(""),
                    self.display_path(),
                    range,
                    self.content
                ))
            }
            AttachmentKind::File => ContentBlock::text(format!(
                "```\n// File: {}\n{}\n```",
                self.display_path(),
                self.content
            )),
        }
    }

    fn display_text(&self) -> String {
        match self.kind {
            AttachmentKind::Image => format!("[Image: {}]", self.name),
            _ => self.to_content_block().as_text().unwrap_or_default().to_string(),
        }
    }
}

/// Content blocks for the agent plus the text echoed into the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPrompt {
    pub blocks: Vec<ContentBlock>,
    pub display_text: String,
}

/// Assembles a prompt from typed text and attachments.
///
/// Attachments come first in the order given; the typed text is appended last.
///
/// # Errors
///
/// Returns `InvalidInput` when there is neither text nor an attachment.
pub fn build_prompt(text: &str, attachments: &[Attachment]) -> Result<PreparedPrompt> {
    let mut blocks = Vec::with_capacity(attachments.len() + 1);
    let mut display = Vec::with_capacity(attachments.len() + 1);

    for attachment in attachments {
        blocks.push(attachment.to_content_block());
        display.push(attachment.display_text());
    }

    if !text.trim().is_empty() {
        blocks.push(ContentBlock::text(text));
        display.push(text.to_string());
    }

    if blocks.is_empty() {
        return Err(NexusError::invalid_input("message has no text or attachments"));
    }

    Ok(PreparedPrompt {
        blocks,
        display_text: display.join("\n\n"),
    })
}

/// Maps a file extension to the fence language used for code blocks.
pub fn language_from_extension(extension: &str) -> Option<&'static str> {
    let language = match extension.to_ascii_lowercase().as_str() {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "py" => "python",
        "java" => "java",
        "c" => "c",
        "cpp" => "cpp",
        "go" => "go",
        "rs" => "rust",
        "rb" => "ruby",
        "php" => "php",
        "html" => "html",
        "css" => "css",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "xml" => "xml",
        "md" => "markdown",
        "sh" => "bash",
        "sql" => "sql",
        _ => return None,
    };
    Some(language)
}

pub fn language_for_path(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(language_from_extension)
        .map(str::to_string)
}

pub fn is_image_extension(extension: &str) -> bool {
    let lower = extension.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&lower.as_str())
}
