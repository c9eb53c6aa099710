//! Text collection from framework-embedded state (`__NEXT_DATA__`,
//! `__NUXT__`, Apollo caches and similar JSON blobs).
//!
//! Traversal is an explicit worklist so adversarially deep documents cannot
//! exhaust the stack. Each node is visited at most once (keyed by address)
//! and each distinct string is emitted once, at its first occurrence.

use serde_json::Value;
use std::collections::HashSet;

/// Strings shorter than this are labels, ids or enum values, not prose.
const MIN_TEXT_CHARS: usize = 20;

/// Keys whose values are never content.
const SKIP_KEYS: &[&str] = &[
    "__typename",
    "buildId",
    "className",
    "href",
    "id",
    "image",
    "locale",
    "slug",
    "src",
    "url",
];

/// Collect prose-like strings from `value` in document order, joined by blank
/// lines, stopping once `max_chars` characters have been gathered.
pub fn collect_text(value: &Value, max_chars: usize) -> String {
    let mut out = String::new();
    let mut out_chars = 0usize;
    let mut visited: HashSet<*const Value> = HashSet::new();
    let mut seen_text: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&Value> = vec![value];

    while let Some(node) = stack.pop() {
        if out_chars >= max_chars {
            break;
        }
        if !visited.insert(node as *const Value) {
            continue;
        }

        match node {
            Value::String(s) => {
                let text = s.trim();
                let len = text.chars().count();
                if len < MIN_TEXT_CHARS || !text.contains(char::is_whitespace) || looks_like_markup(text) {
                    continue;
                }
                if !seen_text.insert(text) {
                    continue;
                }
                if !out.is_empty() {
                    out.push_str("\n\n");
                    out_chars += 2;
                }
                let remaining = max_chars.saturating_sub(out_chars);
                let piece = super::truncate_chars(text, remaining);
                out.push_str(piece);
                out_chars += piece.chars().count();
            }
            Value::Array(items) => {
                for item in items.iter().rev() {
                    stack.push(item);
                }
            }
            Value::Object(map) => {
                let children: Vec<&Value> = map
                    .iter()
                    .filter(|(k, _)| !SKIP_KEYS.contains(&k.as_str()))
                    .map(|(_, v)| v)
                    .collect();
                for child in children.into_iter().rev() {
                    stack.push(child);
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    out
}

fn looks_like_markup(text: &str) -> bool {
    let t = text.trim_start();
    (t.starts_with('<') && t.ends_with('>')) || t.starts_with("http://") || t.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collects_prose_in_document_order() {
        let data = json!({
            "props": {
                "pageProps": {
                    "a_title": "A reasonably long headline for the story",
                    "b_body": ["First paragraph of the article body text.", "Second paragraph continues the thought."],
                    "id": "this id string should never be collected at all",
                    "tag": "news"
                }
            },
            "buildId": "abc123 with spaces that is long enough"
        });
        let text = collect_text(&data, 10_000);
        let parts: Vec<&str> = text.split("\n\n").collect();
        assert_eq!(
            parts,
            vec![
                "A reasonably long headline for the story",
                "First paragraph of the article body text.",
                "Second paragraph continues the thought."
            ]
        );
    }

    #[test]
    fn test_duplicates_emitted_once() {
        let repeated = "The same sentence appears in two places here.";
        let data = json!({ "a": repeated, "b": { "c": repeated }, "d": [repeated] });
        assert_eq!(collect_text(&data, 10_000), repeated);
    }

    #[test]
    fn test_respects_max_chars() {
        let data = json!(["one long sentence that keeps going and going", "another long sentence that also keeps going"]);
        let text = collect_text(&data, 30);
        assert!(text.chars().count() <= 30);
        assert!(text.starts_with("one long sentence"));
    }

    #[test]
    fn test_deeply_nested_input_does_not_overflow() {
        let mut value = json!("a leaf sentence deep inside the document tree");
        for _ in 0..20_000 {
            value = Value::Array(vec![value]);
        }
        let text = collect_text(&value, 1000);
        assert_eq!(text, "a leaf sentence deep inside the document tree");
        // serde_json's Drop is recursive; leak the deep value instead of dropping it.
        std::mem::forget(value);
    }

    #[test]
    fn test_skips_urls_and_markup() {
        let data = json!({
            "link": "https://example.com/some/very/long/path with space",
            "html": "<div class=\"x\">markup fragment here</div>",
            "text": "Actual readable sentence for the reader."
        });
        assert_eq!(collect_text(&data, 1000), "Actual readable sentence for the reader.");
    }
}
