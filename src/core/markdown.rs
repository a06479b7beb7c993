//! Restricted markdown to HTML
//!
//! Supports:
//! - Fenced and indented code blocks (`<pre><code>`)
//! - `Inline code`
//! - Headers 1-4 (`<h1>`..`<h4>`); deeper levels stay literal
//! - **Bold** and *italic*
//! - Unordered and ordered lists
//! - Links to http, https and mailto targets
//!
//! Paragraphs are not wrapped: they come out as escaped text separated by a
//! blank line, so plain text passes through untouched. Everything else,
//! including raw HTML, is escaped.

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};

/// Escape text for inclusion in HTML
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    push_escaped(&mut out, text);
    out
}

fn push_escaped(out: &mut String, text: &str) {
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
}

fn is_safe_link(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    ["http://", "https://", "mailto:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

fn heading_number(level: HeadingLevel) -> usize {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Render assistant markdown to an HTML fragment
pub fn to_html(text: &str) -> String {
    let mut writer = HtmlWriter::default();
    for event in Parser::new_ext(text, Options::empty()) {
        writer.event(event);
    }
    writer.out
}

#[derive(Default)]
struct HtmlWriter {
    out: String,
    /// A paragraph-like block just ended and the next block needs a blank line
    needs_separator: bool,
    /// One entry per open link: whether an `<a>` was emitted for it
    links: Vec<bool>,
}

impl HtmlWriter {
    fn start_block(&mut self) {
        if self.needs_separator {
            self.out.push_str("\n\n");
        }
        self.needs_separator = false;
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(Tag::Paragraph) | Event::Start(Tag::HtmlBlock) => self.start_block(),
            Event::End(TagEnd::Paragraph) => self.needs_separator = true,
            Event::End(TagEnd::HtmlBlock) => {
                while self.out.ends_with('\n') {
                    self.out.pop();
                }
                self.needs_separator = true;
            }

            Event::Start(Tag::Heading { level, .. }) => {
                self.start_block();
                let n = heading_number(level);
                if n <= 4 {
                    self.out.push_str(&format!("<h{}>", n));
                } else {
                    self.out.push_str(&"#".repeat(n));
                    self.out.push(' ');
                }
            }
            Event::End(TagEnd::Heading(level)) => {
                let n = heading_number(level);
                if n <= 4 {
                    self.out.push_str(&format!("</h{}>", n));
                    self.needs_separator = false;
                } else {
                    self.needs_separator = true;
                }
            }

            Event::Start(Tag::CodeBlock(kind)) => {
                self.start_block();
                let lang = match &kind {
                    CodeBlockKind::Fenced(info) => info.split_whitespace().next().unwrap_or(""),
                    CodeBlockKind::Indented => "",
                };
                if lang.is_empty() {
                    self.out.push_str("<pre><code>");
                } else {
                    self.out.push_str("<pre><code class=\"language-");
                    push_escaped(&mut self.out, lang);
                    self.out.push_str("\">");
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                if self.out.ends_with('\n') {
                    self.out.pop();
                }
                self.out.push_str("</code></pre>");
                self.needs_separator = false;
            }

            Event::Start(Tag::List(start)) => {
                self.start_block();
                match start {
                    None => self.out.push_str("<ul>"),
                    Some(1) => self.out.push_str("<ol>"),
                    Some(n) => self.out.push_str(&format!("<ol start=\"{}\">", n)),
                }
            }
            Event::End(TagEnd::List(ordered)) => {
                self.out.push_str(if ordered { "</ol>" } else { "</ul>" });
                self.needs_separator = false;
            }
            Event::Start(Tag::Item) => {
                self.out.push_str("<li>");
                self.needs_separator = false;
            }
            Event::End(TagEnd::Item) => {
                self.out.push_str("</li>");
                self.needs_separator = false;
            }

            Event::Start(Tag::BlockQuote) => {
                self.start_block();
                self.out.push_str("&gt; ");
            }
            Event::End(TagEnd::BlockQuote) => self.needs_separator = true,

            Event::Start(Tag::Strong) => self.out.push_str("<strong>"),
            Event::End(TagEnd::Strong) => self.out.push_str("</strong>"),
            Event::Start(Tag::Emphasis) => self.out.push_str("<em>"),
            Event::End(TagEnd::Emphasis) => self.out.push_str("</em>"),

            Event::Start(Tag::Link { dest_url, .. }) => {
                let safe = is_safe_link(&dest_url);
                if safe {
                    self.out.push_str("<a href=\"");
                    push_escaped(&mut self.out, dest_url.trim());
                    self.out
                        .push_str("\" target=\"_blank\" rel=\"noopener noreferrer\">");
                }
                self.links.push(safe);
            }
            Event::End(TagEnd::Link) => {
                if self.links.pop().unwrap_or(false) {
                    self.out.push_str("</a>");
                }
            }

            Event::Rule => {
                self.start_block();
                self.out.push_str("<hr>");
            }

            Event::Text(text) | Event::Html(text) | Event::InlineHtml(text) => {
                push_escaped(&mut self.out, &text);
            }
            Event::Code(code) => {
                self.out.push_str("<code>");
                push_escaped(&mut self.out, &code);
                self.out.push_str("</code>");
            }
            Event::SoftBreak | Event::HardBreak => self.out.push('\n'),

            // Images show their alt text, which arrives as Text events
            _ => {}
        }
    }
}
