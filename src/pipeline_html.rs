//! HTML pipeline: parse, sanitize, strip chrome, convert to Markdown,
//! and collect links.
//!
//! Processing steps:
//! 1. parse into a DOM (`scraper`);
//! 2. mark the strip-set: scripts, styles, navigation, footers, ads,
//!    cookie banners, and anything with a banner/navigation role;
//! 3. serialize the remaining tree to Markdown, preserving fenced code
//!    blocks (language from `class="language-*"` or an ancestor
//!    `highlight-source-*`) and tables;
//! 4. collect `href` targets from the surviving links, resolved against
//!    the document URL.

use async_trait::async_trait;
use ego_tree::{NodeId, NodeRef};
use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

use crate::error::Result;
use crate::models::{ProcessedContent, RawContent};
use crate::pipelines::ContentPipeline;

/// Elements removed wholesale before conversion. Beyond scripts and
/// styles this is the page chrome that would otherwise drown the prose:
/// navigation, footers, sidebars, forms, consent and ad containers.
const STRIP_SELECTORS: &[&str] = &[
    "script",
    "style",
    "noscript",
    "template",
    "iframe",
    "svg",
    "nav",
    "footer",
    "aside",
    "form",
    "button",
    "[role=\"banner\"]",
    "[role=\"navigation\"]",
    "[role=\"complementary\"]",
    "[role=\"contentinfo\"]",
    "[aria-hidden=\"true\"]",
    ".cookie-banner",
    ".cookie-consent",
    ".advertisement",
    ".ads",
    ".breadcrumbs",
    "#cookie-banner",
];

fn strip_selectors() -> &'static Vec<Selector> {
    static SELECTORS: OnceLock<Vec<Selector>> = OnceLock::new();
    SELECTORS.get_or_init(|| {
        STRIP_SELECTORS
            .iter()
            .map(|s| Selector::parse(s).expect("static selector"))
            .collect()
    })
}

fn title_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("title").expect("static selector"))
}

fn h1_selector() -> &'static Selector {
    static SELECTOR: OnceLock<Selector> = OnceLock::new();
    SELECTOR.get_or_init(|| Selector::parse("h1").expect("static selector"))
}

pub struct HtmlPipeline;

impl HtmlPipeline {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HtmlPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentPipeline for HtmlPipeline {
    fn can_process(&self, raw: &RawContent) -> bool {
        matches!(
            raw.mime_type.as_str(),
            "text/html" | "application/xhtml+xml"
        )
    }

    async fn process(&self, raw: &RawContent) -> Result<ProcessedContent> {
        let html = raw.text();
        let document = Html::parse_document(&html);
        let base = Url::parse(&raw.source_url).ok();

        let mut skip: HashSet<NodeId> = HashSet::new();
        for selector in strip_selectors() {
            for element in document.select(selector) {
                skip.insert(element.id());
            }
        }

        let title = document
            .select(title_selector())
            .next()
            .map(|el| el.text().collect::<String>())
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty())
            .or_else(|| {
                document
                    .select(h1_selector())
                    .next()
                    .map(|el| el.text().collect::<String>().trim().to_string())
                    .filter(|t| !t.is_empty())
            });

        let mut converter = Converter {
            base,
            skip: &skip,
            links: Vec::new(),
            list_depth: 0,
        };
        let body = converter.render_children(document.tree.root());
        let content = tidy(&body);

        let mut seen = HashSet::new();
        let links: Vec<String> = converter
            .links
            .into_iter()
            .filter(|l| seen.insert(l.clone()))
            .collect();

        Ok(ProcessedContent {
            content,
            title,
            links,
            errors: Vec::new(),
        })
    }
}

struct Converter<'a> {
    base: Option<Url>,
    skip: &'a HashSet<NodeId>,
    links: Vec<String>,
    list_depth: usize,
}

impl Converter<'_> {
    fn render_children(&mut self, node: NodeRef<'_, Node>) -> String {
        let mut out = String::new();
        for child in node.children() {
            out.push_str(&self.render_node(child, false));
        }
        out
    }

    fn render_node(&mut self, node: NodeRef<'_, Node>, in_pre: bool) -> String {
        match node.value() {
            Node::Text(text) => {
                if in_pre {
                    text.to_string()
                } else {
                    collapse_whitespace(&text)
                }
            }
            Node::Element(element) => {
                if self.skip.contains(&node.id()) {
                    return String::new();
                }
                self.render_element(node, &element)
            }
            _ => String::new(),
        }
    }

    fn render_element(
        &mut self,
        node: NodeRef<'_, Node>,
        element: &Element,
    ) -> String {
        match element.name() {
            "head" | "title" | "meta" | "link" => String::new(),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = element.name().as_bytes()[1] - b'0';
                let text = self.render_children(node).trim().to_string();
                if text.is_empty() {
                    String::new()
                } else {
                    format!("\n\n{} {}\n\n", "#".repeat(level as usize), text)
                }
            }
            "p" | "figure" | "figcaption" | "address" => {
                format!("\n\n{}\n\n", self.render_children(node).trim())
            }
            "br" => "\n".to_string(),
            "hr" => "\n\n---\n\n".to_string(),
            "strong" | "b" => wrap_inline(self.render_children(node), "**"),
            "em" | "i" => wrap_inline(self.render_children(node), "*"),
            "code" => {
                let text = collect_text(node);
                if text.is_empty() {
                    String::new()
                } else {
                    format!("`{}`", text.trim())
                }
            }
            "pre" => {
                let text = collect_text(node);
                let text = text.trim_matches('\n');
                let lang = detect_language(node);
                format!("\n\n```{lang}\n{text}\n```\n\n")
            }
            "a" => {
                let text = self.render_children(node).trim().to_string();
                match element.attr("href").and_then(|href| self.resolve(href)) {
                    Some(target) => {
                        self.links.push(target.clone());
                        if text.is_empty() {
                            target
                        } else {
                            format!("[{text}]({target})")
                        }
                    }
                    None => text,
                }
            }
            "img" => {
                let alt = element.attr("alt").unwrap_or("").trim();
                match element.attr("src").and_then(|src| self.resolve(src)) {
                    Some(src) => format!("![{alt}]({src})"),
                    None => alt.to_string(),
                }
            }
            "ul" => self.render_list(node, false),
            "ol" => self.render_list(node, true),
            "blockquote" => {
                let inner = tidy(&self.render_children(node));
                let quoted = inner
                    .lines()
                    .map(|line| format!("> {line}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("\n\n{quoted}\n\n")
            }
            "table" => self.render_table(node),
            _ => self.render_children(node),
        }
    }

    fn render_list(&mut self, node: NodeRef<'_, Node>, ordered: bool) -> String {
        self.list_depth += 1;
        let mut items = Vec::new();
        let mut index = 0usize;
        for child in node.children() {
            let Some(element) = ElementRef::wrap(child) else {
                continue;
            };
            if element.value().name() != "li" || self.skip.contains(&child.id()) {
                continue;
            }
            index += 1;
            let marker = if ordered {
                format!("{index}.")
            } else {
                "-".to_string()
            };
            let body = tidy(&self.render_children(child));
            let mut lines = body.lines();
            let first = lines.next().unwrap_or("").to_string();
            let mut item = format!("{marker} {first}");
            // Continuation lines (including nested lists) indent under
            // their item marker; nesting accumulates one level per list.
            for line in lines {
                item.push_str(&format!("\n  {line}"));
            }
            items.push(item);
        }
        self.list_depth -= 1;
        if items.is_empty() {
            String::new()
        } else if self.list_depth > 0 {
            // Nested list: stays attached to its parent item.
            format!("\n{}", items.join("\n"))
        } else {
            format!("\n\n{}\n\n", items.join("\n"))
        }
    }

    fn render_table(&mut self, node: NodeRef<'_, Node>) -> String {
        let mut rows: Vec<Vec<String>> = Vec::new();
        collect_rows(self, node, &mut rows);
        if rows.is_empty() {
            return String::new();
        }
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, String::new());
        }
        let mut out = String::from("\n\n");
        out.push_str(&format!("| {} |\n", rows[0].join(" | ")));
        out.push_str(&format!("|{}\n", " --- |".repeat(width)));
        for row in &rows[1..] {
            out.push_str(&format!("| {} |\n", row.join(" | ")));
        }
        out.push('\n');
        out
    }

    fn resolve(&mut self, target: &str) -> Option<String> {
        let target = target.trim();
        if target.is_empty()
            || target.starts_with('#')
            || target.starts_with("javascript:")
            || target.starts_with("mailto:")
            || target.starts_with("data:")
        {
            return None;
        }
        match &self.base {
            Some(base) => base.join(target).ok().map(|u| u.to_string()),
            None => Some(target.to_string()),
        }
    }
}

fn collect_rows(
    converter: &mut Converter<'_>,
    node: NodeRef<'_, Node>,
    rows: &mut Vec<Vec<String>>,
) {
    for child in node.children() {
        let Some(element) = ElementRef::wrap(child) else {
            continue;
        };
        if converter.skip.contains(&child.id()) {
            continue;
        }
        match element.value().name() {
            "tr" => {
                let mut cells = Vec::new();
                for cell in child.children() {
                    let Some(cell_el) = ElementRef::wrap(cell) else {
                        continue;
                    };
                    if matches!(cell_el.value().name(), "td" | "th") {
                        let text = converter.render_children(cell);
                        cells.push(
                            text.split_whitespace()
                                .collect::<Vec<_>>()
                                .join(" ")
                                .replace('|', "\\|"),
                        );
                    }
                }
                rows.push(cells);
            }
            "thead" | "tbody" | "tfoot" => collect_rows(converter, child, rows),
            _ => {}
        }
    }
}

/// All text under a node, verbatim (used for `pre` and `code`).
fn collect_text(node: NodeRef<'_, Node>) -> String {
    let mut out = String::new();
    for descendant in node.descendants() {
        if let Node::Text(text) = descendant.value() {
            out.push_str(&text);
        }
    }
    out
}

/// Fence language for a `pre` block: a `language-*`/`lang-*` class on the
/// block or its code child, else a `highlight-source-*` class on an
/// ancestor (the GitHub rendering convention).
fn detect_language(node: NodeRef<'_, Node>) -> String {
    for candidate in node.descendants() {
        if let Node::Element(element) = candidate.value() {
            for class in element.classes() {
                if let Some(lang) = class
                    .strip_prefix("language-")
                    .or_else(|| class.strip_prefix("lang-"))
                {
                    return lang.to_string();
                }
            }
        }
    }
    for ancestor in node.ancestors() {
        if let Node::Element(element) = ancestor.value() {
            for class in element.classes() {
                if let Some(lang) = class.strip_prefix("highlight-source-") {
                    return lang.to_string();
                }
            }
        }
    }
    String::new()
}

fn collapse_whitespace(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return if text.is_empty() { String::new() } else { " ".to_string() };
    }
    let mut out = String::new();
    if text.starts_with(char::is_whitespace) {
        out.push(' ');
    }
    out.push_str(&collapsed);
    if text.ends_with(char::is_whitespace) {
        out.push(' ');
    }
    out
}

fn wrap_inline(inner: String, marker: &str) -> String {
    let trimmed = inner.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{marker}{trimmed}{marker}")
    }
}

/// Collapse runs of blank lines and trim the result.
fn tidy(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            out.push('\n');
        } else {
            blank_run = 0;
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }
    out.trim().to_string()
}
