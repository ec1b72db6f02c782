//! Builds attachments from files on disk.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use nexus_core::attachment::{Attachment, is_image_extension, language_for_path};
use nexus_core::error::{NexusError, Result};
use std::path::Path;

/// Reads `path` into an attachment.
///
/// Image extensions become base64 data URLs; anything else is read as text.
///
/// # Errors
///
/// Returns an IO error if the file cannot be read.
pub async fn load_attachment(path: &Path) -> Result<Attachment> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| NexusError::invalid_input(format!("{:?} is not a file path", path)))?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();

    let bytes = tokio::fs::read(path).await?;
    let display_path = path.to_string_lossy().into_owned();

    if is_image_extension(extension) {
        let mime = image_mime_type(path);
        let data_url = format!("data:{};base64,{}", mime, STANDARD.encode(&bytes));
        tracing::debug!("[AttachmentLoader] Loaded image {} ({} bytes)", name, bytes.len());
        let mut attachment = Attachment::image(name, data_url, Some(mime));
        attachment.path = Some(display_path);
        return Ok(attachment);
    }

    let content = String::from_utf8_lossy(&bytes).into_owned();
    tracing::debug!("[AttachmentLoader] Loaded file {} ({} bytes)", name, bytes.len());
    Ok(Attachment::file(display_path, name, content))
}

/// Code attachment for a selection inside an open document.
pub fn code_selection(path: &Path, content: &str, start_line: u32, end_line: u32) -> Attachment {
    let display_path = path.to_string_lossy().into_owned();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| display_path.clone());
    let language = language_for_path(&display_path);
    Attachment::code(
        display_path,
        name,
        content,
        language,
        Some((start_line, end_line)),
    )
}

fn image_mime_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first()
        .filter(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| "image/png".to_string())
}
