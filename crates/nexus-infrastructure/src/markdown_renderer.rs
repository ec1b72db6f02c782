use nexus_core::render::MarkdownRenderer;

/// GitHub-flavoured markdown to HTML via the `markdown` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct GfmRenderer;

impl MarkdownRenderer for GfmRenderer {
    fn render(&self, text: &str) -> Option<String> {
        match markdown::to_html_with_options(text, &markdown::Options::gfm()) {
            Ok(html) => Some(html),
            Err(e) => {
                tracing::warn!("[GfmRenderer] Failed to render markdown: {}", e);
                None
            }
        }
    }
}
