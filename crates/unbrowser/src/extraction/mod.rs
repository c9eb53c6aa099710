//! Candidate selection within a single tier.
//!
//! Executors report every place content or a title could have come from;
//! this module picks the winner and records why each earlier candidate lost.

pub mod framework;
pub mod text;

use serde::{Deserialize, Serialize};

use crate::confidence::ExtractionSource;
use crate::trace::{SelectorAttempt, TitleAttempt};
use crate::types::Tier;

/// A place the main content could come from. `content` is `None` when the
/// selector matched nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentCandidate {
    pub selector: String,
    pub source: ExtractionSource,
    pub content: Option<String>,
}

impl ContentCandidate {
    pub fn new(selector: impl Into<String>, source: ExtractionSource, content: Option<String>) -> Self {
        Self {
            selector: selector.into(),
            source,
            content,
        }
    }
}

/// A place the title could come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleCandidate {
    pub label: String,
    pub source: ExtractionSource,
    pub value: Option<String>,
}

impl TitleCandidate {
    pub fn new(label: impl Into<String>, source: ExtractionSource, value: Option<String>) -> Self {
        Self {
            label: label.into(),
            source,
            value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentSelection {
    pub attempts: Vec<SelectorAttempt>,
    pub selected: Option<ContentCandidate>,
}

impl ContentSelection {
    /// Length of the longest matched candidate, for failure messages.
    pub fn best_length(&self) -> usize {
        self.attempts
            .iter()
            .map(|a| a.content_length)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct TitleSelection {
    pub attempts: Vec<TitleAttempt>,
    pub selected: Option<TitleCandidate>,
}

fn by_priority<T>(candidates: &[T], source: impl Fn(&T) -> ExtractionSource) -> Vec<&T> {
    let mut ordered: Vec<&T> = candidates.iter().collect();
    ordered.sort_by_key(|c| source(*c).rank());
    ordered
}

/// Pick the first candidate, in priority order, that matched and has at least
/// `min_chars` characters. Candidates after the winner are not tried.
pub fn select_content(tier: Tier, candidates: &[ContentCandidate], min_chars: usize) -> ContentSelection {
    let mut attempts = Vec::new();
    let mut selected = None;

    for candidate in by_priority(candidates, |c: &ContentCandidate| c.source) {
        let text = candidate.content.as_deref().map(str::trim).unwrap_or("");
        let length = text.chars().count();
        let matched = length > 0;
        let accepted = matched && length >= min_chars.max(1);

        let skip_reason = if !matched {
            Some("no match".to_string())
        } else if !accepted {
            Some(format!("insufficient content ({length} chars)"))
        } else {
            None
        };

        attempts.push(SelectorAttempt {
            tier,
            selector: candidate.selector.clone(),
            source: candidate.source.as_str().to_string(),
            matched,
            content_length: length,
            confidence_score: candidate.source.prior(),
            selected: accepted,
            skip_reason,
        });

        if accepted {
            selected = Some(candidate.clone());
            break;
        }
    }

    ContentSelection { attempts, selected }
}

/// Pick the first title candidate, in priority order, with a non-blank value
/// of at least `min_chars` characters.
pub fn select_title(tier: Tier, candidates: &[TitleCandidate], min_chars: usize) -> TitleSelection {
    let mut attempts = Vec::new();
    let mut selected = None;

    for candidate in by_priority(candidates, |c: &TitleCandidate| c.source) {
        let value = candidate
            .value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let matched = value.is_some();
        let length = value.map(|v| v.chars().count()).unwrap_or(0);
        let accepted = matched && length >= min_chars.max(1);

        attempts.push(TitleAttempt {
            tier,
            source: candidate.label.clone(),
            value: value.map(str::to_string),
            matched,
            confidence_score: candidate.source.prior(),
            selected: accepted,
            skip_reason: if !matched {
                Some("no match".to_string())
            } else if !accepted {
                Some(format!("title too short ({length} chars)"))
            } else {
                None
            },
        });

        if accepted {
            selected = Some(TitleCandidate {
                value: value.map(str::to_string),
                ..candidate.clone()
            });
            break;
        }
    }

    TitleSelection { attempts, selected }
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(selector: &str, source: ExtractionSource, len: Option<usize>) -> ContentCandidate {
        ContentCandidate::new(selector, source, len.map(|n| "x".repeat(n)))
    }

    #[test]
    fn test_priority_order_and_floor() {
        let candidates = vec![
            content("body", ExtractionSource::Fallback, Some(5000)),
            content("main", ExtractionSource::Heuristic, Some(50)),
            content("__NEXT_DATA__", ExtractionSource::FrameworkData, None),
            content("article", ExtractionSource::SelectorMatch, Some(900)),
        ];
        let selection = select_content(Tier::Lightweight, &candidates, 200);

        let tried: Vec<&str> = selection.attempts.iter().map(|a| a.selector.as_str()).collect();
        assert_eq!(tried, vec!["__NEXT_DATA__", "article"]);
        assert!(!selection.attempts[0].matched);
        assert_eq!(selection.attempts[0].skip_reason.as_deref(), Some("no match"));
        assert!(selection.attempts[1].selected);
        assert_eq!(selection.selected.unwrap().selector, "article");
    }

    #[test]
    fn test_short_candidates_are_skipped_with_reason() {
        let candidates = vec![
            content("article", ExtractionSource::SelectorMatch, Some(50)),
            content("body", ExtractionSource::Fallback, Some(400)),
        ];
        let selection = select_content(Tier::Lightweight, &candidates, 200);
        assert_eq!(
            selection.attempts[0].skip_reason.as_deref(),
            Some("insufficient content (50 chars)")
        );
        assert!(selection.attempts[0].matched);
        assert!(!selection.attempts[0].selected);
        assert!(selection.attempts[1].selected);
        assert_eq!(selection.attempts.iter().filter(|a| a.selected).count(), 1);
    }

    #[test]
    fn test_nothing_meets_floor() {
        let candidates = vec![content("api", ExtractionSource::ApiResponse, Some(40))];
        let selection = select_content(Tier::Intelligence, &candidates, 200);
        assert!(selection.selected.is_none());
        assert_eq!(selection.best_length(), 40);
        assert!(selection.attempts.iter().all(|a| !a.selected));
    }

    #[test]
    fn test_equal_rank_keeps_reported_order() {
        let candidates = vec![
            content("article", ExtractionSource::SelectorMatch, Some(300)),
            content(".post-body", ExtractionSource::SelectorMatch, Some(300)),
        ];
        let selection = select_content(Tier::Lightweight, &candidates, 200);
        assert_eq!(selection.selected.unwrap().selector, "article");
    }

    #[test]
    fn test_title_selection() {
        let candidates = vec![
            TitleCandidate::new("h1", ExtractionSource::Heuristic, Some("Heading".into())),
            TitleCandidate::new("og:title", ExtractionSource::MetaTags, Some("   ".into())),
            TitleCandidate::new("json-ld", ExtractionSource::StructuredData, None),
        ];
        let selection = select_title(Tier::Lightweight, &candidates, 1);
        let order: Vec<&str> = selection.attempts.iter().map(|a| a.source.as_str()).collect();
        assert_eq!(order, vec!["json-ld", "og:title", "h1"]);
        let winner = selection.selected.unwrap();
        assert_eq!(winner.label, "h1");
        assert_eq!(winner.value.as_deref(), Some("Heading"));
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
