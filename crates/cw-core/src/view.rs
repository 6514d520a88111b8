//! Concrete views: an HTML fragment builder and a plain-text progress
//! writer for terminals.

use std::io::Write;

use cw_backend::{StreamError, StreamHandler};
use cw_protocol::{InlineSourceRecord, StreamResult};

use crate::config::ThemeConfig;
use crate::markup::escape_html;
use crate::orchestrator::MessageView;

/// Buffers the latest state of one message and renders it as a single
/// HTML fragment.
#[derive(Debug, Clone, Default)]
pub struct HtmlView {
    role: String,
    accent: String,
    dark: bool,
    content: String,
    sources: String,
    references: String,
    error: Option<String>,
    updates: usize,
}

impl HtmlView {
    pub fn new(role: &str) -> Self {
        Self {
            role: role.to_string(),
            ..Default::default()
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Number of content re-renders since initialization.
    pub fn updates(&self) -> usize {
        self.updates
    }

    pub fn fragment(&self) -> String {
        let mut html = format!(
            "<div class=\"chat-message {}\" data-theme=\"{}\"",
            escape_html(&self.role),
            if self.dark { "dark" } else { "light" }
        );
        if !self.accent.is_empty() {
            html.push_str(&format!(" style=\"--accent: {}\"", escape_html(&self.accent)));
        }
        html.push_str(">\n");
        html.push_str(&format!("<div class=\"content\">{}</div>\n", self.content));
        for section in [&self.sources, &self.references] {
            if !section.is_empty() {
                html.push_str(section);
                html.push('\n');
            }
        }
        if let Some(error) = &self.error {
            html.push_str(&format!(
                "<div class=\"error\" role=\"alert\">{}</div>\n",
                escape_html(error)
            ));
        }
        html.push_str("</div>");
        html
    }
}

impl MessageView for HtmlView {
    fn initialize(&mut self, sources_html: &str, references_html: &str, content_html: &str) {
        self.sources = sources_html.to_string();
        self.references = references_html.to_string();
        self.content = content_html.to_string();
        self.error = None;
        self.updates = 0;
    }

    fn update_content(&mut self, content_html: &str) {
        self.content = content_html.to_string();
        self.updates += 1;
    }

    fn set_sources(&mut self, sources_html: &str) {
        self.sources = sources_html.to_string();
    }

    fn set_references(&mut self, references_html: &str) {
        self.references = references_html.to_string();
    }

    fn show_error(&mut self, message: &str) {
        self.error = Some(message.to_string());
    }

    fn apply_theme(&mut self, theme: &ThemeConfig) {
        self.accent = theme.accent_color.clone();
        self.dark = theme.dark_mode;
    }
}

/// Writes raw deltas as they arrive, with terse status lines.
pub struct ProgressOutput<W: Write> {
    writer: W,
    sources: usize,
}

impl<W: Write> ProgressOutput<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, sources: 0 }
    }

    pub fn emit_status(&mut self, msg: &str) {
        let _ = writeln!(self.writer, "[chat] {msg}");
    }

    pub fn emit_error(&mut self, msg: &str) {
        let _ = writeln!(self.writer, "[chat] error: {msg}");
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> StreamHandler for ProgressOutput<W> {
    fn on_chunk(&mut self, delta: &str, _accumulated: &str, _message_id: Option<&str>) {
        let _ = write!(self.writer, "{delta}");
        let _ = self.writer.flush();
    }

    fn on_source(&mut self, _source: &InlineSourceRecord) {
        self.sources += 1;
    }

    fn on_complete(&mut self, result: &StreamResult) {
        let _ = writeln!(self.writer);
        let sources = result.sources.as_ref().map_or(self.sources, Vec::len);
        if sources > 0 {
            self.emit_status(&format!("{sources} source(s)"));
        }
    }

    fn on_error(&mut self, error: &StreamError) {
        let _ = writeln!(self.writer);
        self.emit_error(&error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_carries_theme_and_sections() {
        let mut view = HtmlView::new("assistant");
        view.apply_theme(&ThemeConfig {
            accent_color: "#123456".to_string(),
            dark_mode: true,
        });
        view.initialize("<ol class=\"sources\"></ol>", "", "<p>x</p>");
        let html = view.fragment();
        assert!(html.starts_with(
            "<div class=\"chat-message assistant\" data-theme=\"dark\" style=\"--accent: #123456\">"
        ));
        assert!(html.contains("<div class=\"content\"><p>x</p></div>"));
        assert!(html.contains("<ol class=\"sources\"></ol>"));
        assert!(html.ends_with("</div>"));
    }

    #[test]
    fn error_is_escaped() {
        let mut view = HtmlView::new("assistant");
        view.show_error("<bad>");
        assert!(view.fragment().contains("<div class=\"error\" role=\"alert\">&lt;bad&gt;</div>"));
    }

    #[test]
    fn updates_counted_from_initialize() {
        let mut view = HtmlView::new("assistant");
        view.update_content("a");
        view.initialize("", "", "");
        view.update_content("b");
        view.update_content("c");
        assert_eq!(view.updates(), 2);
        assert_eq!(view.content(), "c");
    }

    #[test]
    fn progress_writes_deltas_and_status() {
        let mut out = ProgressOutput::new(Vec::new());
        out.on_chunk("Hel", "Hel", None);
        out.on_chunk("lo", "Hello", None);
        out.on_complete(&StreamResult {
            content: "Hello".to_string(),
            sources: Some(vec![InlineSourceRecord {
                source_id: "a".to_string(),
                document_id: "d".to_string(),
                document_name: "D".to_string(),
                page: None,
                source_type: "kb".to_string(),
            }]),
            ..Default::default()
        });
        let text = String::from_utf8(out.into_inner()).unwrap();
        assert_eq!(text, "Hello\n[chat] 1 source(s)\n");
    }

    #[test]
    fn progress_reports_errors() {
        let mut out = ProgressOutput::new(Vec::new());
        out.on_error(&StreamError::Protocol("boom".to_string()));
        let text = String::from_utf8(out.into_inner()).unwrap();
        assert_eq!(text, "\n[chat] error: boom\n");
    }
}
