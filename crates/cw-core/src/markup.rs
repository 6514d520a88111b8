//! Markdown-subset renderer for assistant text.
//!
//! Always invoked on the full accumulated text, never on its own output.
//! The transforms run in a fixed order and each one sees the previous
//! one's output:
//!
//! 1. HTML escaping (unless sanitization is off)
//! 2. fenced code blocks
//! 3. inline code spans
//! 4. headings (`#` → `<h2>`, `##` → `<h3>`, `###` → `<h4>`)
//! 5. bold
//! 6. italic
//! 7. links
//! 8. unordered lists
//! 9. soft line breaks
//!
//! Code produced by steps 2 and 3 is parked in a stash and spliced back at
//! the end, so later steps never touch code contents.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const STASH_OPEN: char = '\u{E000}';
const STASH_CLOSE: char = '\u{E001}';

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?ms)^```([A-Za-z0-9_+#.-]*)[ \t]*\n(.*?)^```[ \t]*$").unwrap()
});
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`\n]+?)`").unwrap());
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(#{1,3}) +(.+?)[ \t]*$").unwrap());
static BOLD_STARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static BOLD_UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"__(.+?)__").unwrap());
static ITALIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*([^*\s](?:[^*\n]*[^*\s])?)\*").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]\n]+)\]\(([^)\s]+)\)").unwrap());
static LIST_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-*] +(.*)$").unwrap());
static HEADING_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^<h[2-4]>").unwrap());
static STASH_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new("\u{E000}(\\d+)\u{E001}").unwrap());

/// Renderer switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Escape HTML in the source text. Turning this off trusts the server.
    pub sanitize: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { sanitize: true }
    }
}

/// Escape the five HTML special characters.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render `text` to an HTML fragment. Never fails; unmatched syntax is
/// passed through literally.
pub fn render_markup(text: &str, options: &RenderOptions) -> String {
    let normalized = text.replace("\r\n", "\n").replace([STASH_OPEN, STASH_CLOSE], "");
    let source = if options.sanitize {
        escape_html(&normalized)
    } else {
        normalized
    };

    let mut stash = Stash::default();
    let html = render_code_blocks(&source, &mut stash);
    let html = render_inline_code(&html, &mut stash);
    let html = render_headings(&html);
    let html = render_bold(&html);
    let html = render_italic(&html);
    let html = render_links(&html, options);
    let html = render_lists(&html);
    let html = insert_line_breaks(&html, &stash);
    stash.restore(&html)
}

#[derive(Debug, Default)]
struct Stash {
    entries: Vec<(String, bool)>,
}

impl Stash {
    fn park(&mut self, html: String, block: bool) -> String {
        self.entries.push((html, block));
        format!("{STASH_OPEN}{}{STASH_CLOSE}", self.entries.len() - 1)
    }

    fn is_block_token(&self, line: &str) -> bool {
        STASH_TOKEN
            .captures(line)
            .filter(|caps| caps.get(0).map(|m| m.as_str().len()) == Some(line.len()))
            .and_then(|caps| caps[1].parse::<usize>().ok())
            .and_then(|idx| self.entries.get(idx))
            .is_some_and(|(_, block)| *block)
    }

    fn restore(&self, html: &str) -> String {
        STASH_TOKEN
            .replace_all(html, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|idx| self.entries.get(idx))
                    .map(|(html, _)| html.clone())
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

fn render_code_blocks(text: &str, stash: &mut Stash) -> String {
    FENCED_BLOCK
        .replace_all(text, |caps: &Captures| {
            let code = caps[2].trim();
            let html = match &caps[1] {
                "" => format!("<pre><code>{code}</code></pre>"),
                lang => format!("<pre><code class=\"language-{lang}\">{code}</code></pre>"),
            };
            stash.park(html, true)
        })
        .into_owned()
}

fn render_inline_code(text: &str, stash: &mut Stash) -> String {
    INLINE_CODE
        .replace_all(text, |caps: &Captures| {
            stash.park(format!("<code>{}</code>", &caps[1]), false)
        })
        .into_owned()
}

fn render_headings(text: &str) -> String {
    HEADING
        .replace_all(text, |caps: &Captures| {
            // The top level is reserved for the surrounding page.
            let level = caps[1].len() + 1;
            format!("<h{level}>{}</h{level}>", &caps[2])
        })
        .into_owned()
}

fn render_bold(text: &str) -> String {
    let html = BOLD_STARS.replace_all(text, "<strong>$1</strong>");
    BOLD_UNDERSCORES
        .replace_all(&html, "<strong>$1</strong>")
        .into_owned()
}

/// Single-star emphasis. A star adjacent to another star never opens or
/// closes a span.
fn render_italic(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut pos = 0;

    while let Some(caps) = ITALIC.captures_at(text, pos) {
        let Some(whole) = caps.get(0) else { break };
        let preceded = whole.start() > 0 && bytes[whole.start() - 1] == b'*';
        let followed = bytes.get(whole.end()) == Some(&b'*');
        if preceded || followed {
            pos = whole.start() + 1;
            continue;
        }
        out.push_str(&text[copied..whole.start()]);
        out.push_str("<em>");
        out.push_str(&caps[1]);
        out.push_str("</em>");
        copied = whole.end();
        pos = whole.end();
    }

    out.push_str(&text[copied..]);
    out
}

fn is_safe_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if ["http://", "https://", "mailto:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return true;
    }
    // No scheme at all: a relative link or fragment.
    match lower.find(':') {
        None => true,
        Some(colon) => lower[..colon].contains(['/', '?', '#']),
    }
}

fn render_links(text: &str, options: &RenderOptions) -> String {
    LINK.replace_all(text, |caps: &Captures| {
        let (label, url) = (&caps[1], &caps[2]);
        // Code never becomes an attribute value.
        if url.contains(STASH_OPEN) {
            return caps[0].to_string();
        }
        if options.sanitize && !is_safe_url(url) {
            return label.to_string();
        }
        format!("<a href=\"{url}\" target=\"_blank\" rel=\"noopener noreferrer\">{label}</a>")
    })
    .into_owned()
}

fn render_lists(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut in_list = false;

    for line in text.split('\n') {
        match LIST_ITEM.captures(line) {
            Some(caps) => {
                if !in_list {
                    lines.push("<ul>".to_string());
                    in_list = true;
                }
                lines.push(format!("<li>{}</li>", &caps[1]));
            }
            None => {
                if in_list {
                    lines.push("</ul>".to_string());
                    in_list = false;
                }
                lines.push(line.to_string());
            }
        }
    }
    if in_list {
        lines.push("</ul>".to_string());
    }

    lines.join("\n")
}

fn is_block_line(line: &str, stash: &Stash) -> bool {
    let line = line.trim();
    line == "<ul>"
        || line == "</ul>"
        || line.starts_with("<li>")
        || HEADING_TAG.is_match(line)
        || stash.is_block_token(line)
}

/// Append `<br>` to paragraph lines followed by more paragraph text.
fn insert_line_breaks(text: &str, stash: &Stash) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out = String::with_capacity(text.len() + lines.len() * 4);

    for (i, line) in lines.iter().enumerate() {
        out.push_str(line);
        if let Some(next) = lines.get(i + 1) {
            if !line.trim().is_empty() && !is_block_line(line, stash) && !is_block_line(next, stash) {
                out.push_str("<br>");
            }
            out.push('\n');
        }
    }

    out
}
