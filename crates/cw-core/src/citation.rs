//! Citation marker resolution and source/reference lists.
//!
//! Runs on rendered HTML. A marker `:cite[id]` becomes a superscript whose
//! number is the 1-based arrival position of `id` among the message's
//! inline sources. Unknown ids are left exactly as written.

use std::borrow::Cow;

use cw_protocol::{InlineSourceRecord, LegacyReferenceSet};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::markup::escape_html;

static CITATION: Lazy<Regex> = Lazy::new(|| Regex::new(r":cite\[([^\]\s]+)\]").unwrap());
static CODE_REGION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<pre\b.*?</pre>|<code\b.*?</code>").unwrap());

/// Replace citation markers outside code regions.
pub fn apply_citations(html: &str, sources: &[InlineSourceRecord]) -> String {
    if sources.is_empty() || !html.contains(":cite[") {
        return html.to_string();
    }

    let mut out = String::with_capacity(html.len());
    let mut copied = 0;
    for code in CODE_REGION.find_iter(html) {
        out.push_str(&replace_markers(&html[copied..code.start()], sources));
        out.push_str(code.as_str());
        copied = code.end();
    }
    out.push_str(&replace_markers(&html[copied..], sources));
    out
}

fn replace_markers<'a>(segment: &'a str, sources: &[InlineSourceRecord]) -> Cow<'a, str> {
    CITATION.replace_all(segment, |caps: &Captures| {
        let id = &caps[1];
        match sources.iter().position(|s| s.source_id == id) {
            Some(idx) => format!(
                "<sup class=\"citation\" data-source-id=\"{id}\">[{}]</sup>",
                idx + 1
            ),
            None => caps[0].to_string(),
        }
    })
}

/// Numbered list of inline sources, in citation order.
pub fn render_source_list(sources: &[InlineSourceRecord]) -> String {
    if sources.is_empty() {
        return String::new();
    }

    let mut html = String::from("<ol class=\"sources\">\n");
    for source in sources {
        let name = if source.document_name.is_empty() {
            escape_html(&source.document_id)
        } else {
            escape_html(&source.document_name)
        };
        let page = source
            .page
            .map(|p| format!(", p. {p}"))
            .unwrap_or_default();
        html.push_str(&format!(
            "<li data-source-id=\"{}\">{name}{page}</li>\n",
            escape_html(&source.source_id)
        ));
    }
    html.push_str("</ol>");
    html
}

/// List of legacy reference documents, linked when metadata carries a URL.
pub fn render_reference_list(references: &LegacyReferenceSet) -> String {
    if references.documents.is_empty() {
        return String::new();
    }

    let mut html = String::from("<ul class=\"references\">\n");
    for doc in &references.documents {
        let name = escape_html(&doc.name);
        let link = doc
            .metadata
            .as_ref()
            .and_then(|m| m.link())
            .filter(|url| url.starts_with("http://") || url.starts_with("https://"));
        match link {
            Some(url) => html.push_str(&format!(
                "<li><a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\">{name}</a></li>\n",
                escape_html(url)
            )),
            None => html.push_str(&format!("<li>{name}</li>\n")),
        }
    }
    html.push_str("</ul>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::{render_markup, RenderOptions};
    use cw_protocol::{ReferenceDocument, ReferenceMetadata};

    fn source(id: &str) -> InlineSourceRecord {
        InlineSourceRecord {
            source_id: id.to_string(),
            document_id: format!("doc-{id}"),
            document_name: format!("Doc {id}"),
            page: None,
            source_type: "kb".to_string(),
        }
    }

    fn abc() -> Vec<InlineSourceRecord> {
        vec![source("a"), source("b"), source("c")]
    }

    #[test]
    fn resolves_by_arrival_position() {
        let html = apply_citations("see :cite[b]", &abc());
        assert_eq!(
            html,
            "see <sup class=\"citation\" data-source-id=\"b\">[2]</sup>"
        );
    }

    #[test]
    fn unknown_marker_passes_through() {
        let html = apply_citations("see :cite[z] and :cite[a]", &abc());
        assert!(html.contains(":cite[z]"));
        assert!(html.contains("[1]</sup>"));
    }

    #[test]
    fn no_sources_leaves_markers() {
        assert_eq!(apply_citations(":cite[a]", &[]), ":cite[a]");
    }

    #[test]
    fn markers_in_code_are_untouched() {
        let rendered = render_markup(
            "cited :cite[a] but `:cite[a]` and\n```\n:cite[c]\n```",
            &RenderOptions::default(),
        );
        let html = apply_citations(&rendered, &abc());
        assert!(html.contains("cited <sup class=\"citation\" data-source-id=\"a\">[1]</sup>"));
        assert!(html.contains("<code>:cite[a]</code>"));
        assert!(html.contains("<pre><code>:cite[c]</code></pre>"));
    }

    #[test]
    fn repeated_marker_gets_same_number() {
        let html = apply_citations(":cite[c] :cite[c]", &abc());
        assert_eq!(html.matches("[3]</sup>").count(), 2);
    }

    #[test]
    fn source_list_in_order_with_pages() {
        let mut sources = abc();
        sources[1].page = Some(7);
        sources[2].document_name = String::new();
        let html = render_source_list(&sources);
        let a = html.find("Doc a").unwrap();
        let b = html.find("Doc b, p. 7").unwrap();
        let c = html.find("doc-c").unwrap();
        assert!(a < b && b < c);
        assert!(html.starts_with("<ol class=\"sources\">"));
        assert_eq!(render_source_list(&[]), "");
    }

    #[test]
    fn reference_list_links_only_http_urls() {
        let refs = LegacyReferenceSet {
            message_id: None,
            documents: vec![
                ReferenceDocument {
                    id: "1".to_string(),
                    name: "Linked <doc>".to_string(),
                    metadata: Some(ReferenceMetadata {
                        source_url: Some("https://example.com/d".to_string()),
                        ..Default::default()
                    }),
                },
                ReferenceDocument {
                    id: "2".to_string(),
                    name: "Script".to_string(),
                    metadata: Some(ReferenceMetadata {
                        url: Some("javascript:alert(1)".to_string()),
                        ..Default::default()
                    }),
                },
            ],
            document_parts: None,
        };
        let html = render_reference_list(&refs);
        assert!(html.contains("<a href=\"https://example.com/d\""));
        assert!(html.contains("Linked &lt;doc&gt;"));
        assert!(html.contains("<li>Script</li>"));
        assert!(!html.contains("javascript"));
    }
}
