/// Converts finished assistant markdown into HTML for display.
pub trait MarkdownRenderer: Send + Sync {
    /// Returns `None` when the text cannot be rendered; callers fall back to raw text.
    fn render(&self, markdown: &str) -> Option<String>;
}
