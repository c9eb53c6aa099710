//! Turn raw HTML into content and title candidates without rendering.
//!
//! Candidates are gathered from JSON-LD, framework state embedded in
//! `<script>` tags, semantic containers and finally `<body>`. Selection is
//! left to the engine.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use unbrowser::extraction::framework::collect_text;
use unbrowser::{ContentCandidate, DiscoveredApi, ExtractionSource, TitleCandidate};

/// Upper bound on text gathered from one embedded JSON blob.
const MAX_FRAMEWORK_CHARS: usize = 100_000;

/// Containers tried for main content, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role=\"main\"]",
    "#content",
    ".content",
    ".post-content",
    ".entry-content",
];

/// Script tags that carry serialized framework state.
const FRAMEWORK_SCRIPTS: &[&str] = &[
    "script#__NEXT_DATA__",
    "script#__NUXT_DATA__",
    "script[type=\"application/json\"][data-state]",
];

const BLOCK_TAGS: &str = "h1, h2, h3, h4, h5, h6, p, li, pre, blockquote";

/// Every candidate found in `html`.
pub struct Candidates {
    pub content: Vec<ContentCandidate>,
    pub titles: Vec<TitleCandidate>,
    /// JSON endpoints the page advertises for itself.
    pub apis: Vec<DiscoveredApi>,
}

pub fn gather(html: &str, base_url: &str, learned_selector: Option<&str>) -> Candidates {
    let document = Html::parse_document(html);
    let jsonld = jsonld_blocks(&document);

    let mut content = Vec::new();
    if let Some(body) = jsonld.iter().find_map(|v| string_field(v, "articleBody")) {
        content.push(ContentCandidate::new(
            "jsonld:articleBody",
            ExtractionSource::StructuredData,
            Some(body),
        ));
    }
    for selector in FRAMEWORK_SCRIPTS {
        if let Some(text) = framework_text(&document, selector) {
            content.push(ContentCandidate::new(*selector, ExtractionSource::FrameworkData, Some(text)));
        }
    }
    if let Some(selector) = learned_selector.filter(|s| !CONTENT_SELECTORS.contains(s)) {
        content.push(ContentCandidate::new(
            selector,
            ExtractionSource::LearnedPattern,
            select_text(&document, selector),
        ));
    }
    for selector in CONTENT_SELECTORS {
        content.push(ContentCandidate::new(
            *selector,
            ExtractionSource::SelectorMatch,
            select_text(&document, selector),
        ));
    }
    content.push(ContentCandidate::new(
        "body",
        ExtractionSource::Fallback,
        select_text(&document, "body"),
    ));

    let titles = vec![
        TitleCandidate::new(
            "jsonld:headline",
            ExtractionSource::StructuredData,
            jsonld.iter().find_map(|v| string_field(v, "headline")),
        ),
        TitleCandidate::new("h1", ExtractionSource::SelectorMatch, first_text(&document, "h1")),
        TitleCandidate::new(
            "og:title",
            ExtractionSource::MetaTags,
            meta_content(&document, "meta[property=\"og:title\"]"),
        ),
        TitleCandidate::new("title", ExtractionSource::MetaTags, first_text(&document, "title")),
    ];

    Candidates {
        content,
        titles,
        apis: discover_apis(&document, base_url),
    }
}

/// Render an HTML fragment (an API's `content.rendered` field, say) as text.
pub fn fragment_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    element_markdown(&fragment.root_element())
}

/// `<link rel="alternate" type="application/json">` and friends, resolved
/// against the page URL.
fn discover_apis(document: &Html, base_url: &str) -> Vec<DiscoveredApi> {
    let Ok(sel) = Selector::parse("link[rel=\"alternate\"][href]") else {
        return Vec::new();
    };
    let base = url::Url::parse(base_url).ok();
    let mut apis: Vec<DiscoveredApi> = Vec::new();
    for el in document.select(&sel) {
        let content_type = el.value().attr("type").unwrap_or("");
        if !content_type.contains("json") {
            continue;
        }
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let resolved = match &base {
            Some(base) => base.join(href).map(|u| u.to_string()).ok(),
            None => url::Url::parse(href).map(|u| u.to_string()).ok(),
        };
        let Some(url) = resolved else {
            continue;
        };
        if apis.iter().any(|a| a.url == url) {
            continue;
        }
        apis.push(DiscoveredApi {
            url,
            method: "GET".to_string(),
            content_type: Some(content_type.to_string()),
        });
    }
    apis
}

/// Whether the page is a JavaScript shell with no server-rendered text.
pub fn looks_like_js_shell(html: &str) -> bool {
    let document = Html::parse_document(html);
    let text_len = select_text(&document, "body")
        .map(|t| t.chars().count())
        .unwrap_or(0);
    let has_root = ["#root", "#app", "#__next"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .any(|sel| document.select(&sel).next().is_some());
    has_root && text_len < 50
}

fn jsonld_blocks(document: &Html) -> Vec<Value> {
    let Ok(sel) = Selector::parse("script[type=\"application/ld+json\"]") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for el in document.select(&sel) {
        let raw: String = el.text().collect();
        match serde_json::from_str::<Value>(raw.trim()) {
            Ok(Value::Array(items)) => out.extend(items),
            Ok(Value::Object(mut map)) => match map.remove("@graph") {
                Some(Value::Array(items)) => out.extend(items),
                _ => out.push(Value::Object(map)),
            },
            Ok(_) => {}
            Err(e) => tracing::debug!("skipping malformed JSON-LD block: {e}"),
        }
    }
    out
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn framework_text(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let raw: String = document.select(&sel).next()?.text().collect();
    let value: Value = serde_json::from_str(raw.trim()).ok()?;
    let text = collect_text(&value, MAX_FRAMEWORK_CHARS);
    (!text.is_empty()).then_some(text)
}

fn meta_content(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .find_map(|el| el.value().attr("content"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let text = collapse(document.select(&sel).next()?.text());
    (!text.is_empty()).then_some(text)
}

/// Text of the first element matching `selector`, rendered as light markdown.
fn select_text(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let el = document.select(&sel).next()?;
    let text = element_markdown(&el);
    (!text.is_empty()).then_some(text)
}

/// Block-level children become headings, list items and paragraphs. Falls
/// back to the element's collapsed text when it has no block children.
fn element_markdown(el: &ElementRef) -> String {
    let Ok(blocks) = Selector::parse(BLOCK_TAGS) else {
        return collapse(el.text());
    };
    let mut parts = Vec::new();
    for block in el.select(&blocks) {
        // Nested blocks (a <p> inside an <li>) are emitted by their parent.
        let nested = block
            .ancestors()
            .take_while(|a| a.id() != el.id())
            .filter_map(ElementRef::wrap)
            .any(|a| blocks.matches(&a));
        if nested {
            continue;
        }
        let text = collapse(block.text());
        if text.is_empty() {
            continue;
        }
        let name = block.value().name();
        let line = match name {
            "li" => format!("- {text}"),
            h if h.len() == 2 && h.starts_with('h') => {
                let level = h[1..].parse::<usize>().unwrap_or(1);
                format!("{} {text}", "#".repeat(level))
            }
            _ => text,
        };
        parts.push(line);
    }
    if parts.is_empty() {
        collapse(el.text())
    } else {
        parts.join("\n\n")
    }
}

fn collapse<'a>(pieces: impl Iterator<Item = &'a str>) -> String {
    let raw: String = pieces.collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
