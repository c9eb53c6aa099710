//! Minimum-content validation applied to a tier's result before it counts as
//! a success.
//!
//! A tier can answer with HTTP 200 and still hand back a cookie wall, a
//! captcha or an empty shell. These checks separate "network succeeded" from
//! "content is usable".

use serde::{Deserialize, Serialize};

/// How strict verification is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// Content length floor only.
    #[default]
    Basic,
    /// Basic plus block/challenge-page detection.
    Standard,
    /// Standard plus at least one semantic structure marker.
    Thorough,
}

/// Caller verification options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyOptions {
    pub enabled: bool,
    pub mode: VerificationMode,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: VerificationMode::Basic,
        }
    }
}

/// Content policy thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Minimum characters for a content candidate to be accepted.
    pub min_content_length: usize,
    /// Minimum characters for a title candidate to be accepted.
    pub min_title_length: usize,
    /// Content shorter than this that contains a block marker is rejected.
    pub block_page_max_length: usize,
    /// Lowercase phrases that identify challenge/block pages.
    pub block_markers: Vec<String>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            min_content_length: 200,
            min_title_length: 1,
            block_page_max_length: 2000,
            block_markers: [
                "access denied",
                "verify you are human",
                "are you a robot",
                "captcha",
                "enable javascript and cookies",
                "please enable javascript",
                "request blocked",
                "attention required",
                "unusual traffic",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// What validation observed about the content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetails {
    pub content_length: usize,
    pub has_semantic_markers: bool,
    pub markers: Vec<String>,
}

/// Outcome of verification, returned to callers alongside content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub confidence: f64,
    pub checks_run: u32,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Detect structural markers in markdown-ish text.
pub fn semantic_markers(content: &str) -> Vec<String> {
    let mut markers = Vec::new();
    let lines: Vec<&str> = content.lines().map(str::trim_start).collect();

    if lines.iter().any(|l| l.starts_with('#')) {
        markers.push("headings".to_string());
    }
    if lines.iter().any(|l| {
        l.starts_with("- ")
            || l.starts_with("* ")
            || l.split_once(". ")
                .map(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false)
    }) {
        markers.push("lists".to_string());
    }
    if content.contains("](") {
        markers.push("links".to_string());
    }
    if lines.iter().any(|l| l.starts_with('|') && l.contains("---")) {
        markers.push("tables".to_string());
    }
    let paragraphs = content
        .split("\n\n")
        .filter(|block| block.trim().chars().count() >= 40)
        .count();
    if paragraphs >= 2 {
        markers.push("paragraphs".to_string());
    }
    markers
}

/// Run the checks selected by `options` against `content`.
pub fn verify(
    content: &str,
    policy: &ValidationPolicy,
    options: &VerifyOptions,
) -> (VerificationResult, ValidationDetails) {
    let length = content.trim().chars().count();
    let markers = semantic_markers(content);
    let details = ValidationDetails {
        content_length: length,
        has_semantic_markers: !markers.is_empty(),
        markers: markers.clone(),
    };

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut checks_run = 1u32;

    if length == 0 {
        errors.push("empty content".to_string());
    }

    if options.enabled {
        checks_run += 1;
        if length > 0 && length < policy.min_content_length {
            errors.push(format!(
                "insufficient content: {length} chars (minimum {})",
                policy.min_content_length
            ));
        }

        if options.mode != VerificationMode::Basic {
            checks_run += 1;
            let lower = content.to_lowercase();
            if let Some(marker) = policy.block_markers.iter().find(|m| lower.contains(m.as_str())) {
                if length < policy.block_page_max_length {
                    errors.push(format!("content looks like a block page (marker: '{marker}')"));
                } else {
                    warnings.push(format!("content mentions '{marker}'"));
                }
            }

            checks_run += 1;
            if markers.is_empty() {
                if options.mode == VerificationMode::Thorough {
                    errors.push("no semantic structure markers found".to_string());
                } else {
                    warnings.push("no semantic structure markers found".to_string());
                }
            }
        }
    }

    let failed_checks = errors.len() as f64;
    let mut confidence = ((checks_run as f64 - failed_checks) / checks_run as f64).max(0.0);
    confidence = (confidence - 0.05 * warnings.len() as f64).max(0.0);

    (
        VerificationResult {
            passed: errors.is_empty(),
            confidence,
            checks_run,
            errors,
            warnings,
        },
        details,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(paragraphs: usize) -> String {
        let mut out = String::from("# Title\n\n");
        for i in 0..paragraphs {
            out.push_str(&format!(
                "Paragraph {i} has enough words in it to count as real prose for the checker.\n\n"
            ));
        }
        out
    }

    #[test]
    fn test_short_content_fails_floor() {
        let (result, details) = verify("tiny", &ValidationPolicy::default(), &VerifyOptions::default());
        assert!(!result.passed);
        assert_eq!(details.content_length, 4);
        assert!(result.errors[0].contains("insufficient content: 4 chars"));
    }

    #[test]
    fn test_empty_content_always_fails() {
        let opts = VerifyOptions {
            enabled: false,
            mode: VerificationMode::Basic,
        };
        let (result, _) = verify("   ", &ValidationPolicy::default(), &opts);
        assert!(!result.passed);
        assert_eq!(result.checks_run, 1);
    }

    #[test]
    fn test_disabled_verification_skips_floor() {
        let opts = VerifyOptions {
            enabled: false,
            mode: VerificationMode::Thorough,
        };
        let (result, _) = verify("tiny", &ValidationPolicy::default(), &opts);
        assert!(result.passed);
    }

    #[test]
    fn test_long_article_passes_all_modes() {
        let content = article(6);
        for mode in [
            VerificationMode::Basic,
            VerificationMode::Standard,
            VerificationMode::Thorough,
        ] {
            let (result, details) = verify(
                &content,
                &ValidationPolicy::default(),
                &VerifyOptions { enabled: true, mode },
            );
            assert!(result.passed, "mode {mode:?}: {:?}", result.errors);
            assert!(details.markers.contains(&"headings".to_string()));
        }
    }

    #[test]
    fn test_block_page_detected_in_standard_mode() {
        let content = format!("Attention Required! Please complete the CAPTCHA. {}", "x".repeat(300));
        let (basic, _) = verify(&content, &ValidationPolicy::default(), &VerifyOptions::default());
        assert!(basic.passed);

        let (standard, _) = verify(
            &content,
            &ValidationPolicy::default(),
            &VerifyOptions {
                enabled: true,
                mode: VerificationMode::Standard,
            },
        );
        assert!(!standard.passed);
        assert!(standard.errors.iter().any(|e| e.contains("block page")));
    }

    #[test]
    fn test_thorough_requires_structure() {
        let flat = "word ".repeat(100);
        let (result, details) = verify(
            &flat,
            &ValidationPolicy::default(),
            &VerifyOptions {
                enabled: true,
                mode: VerificationMode::Thorough,
            },
        );
        assert!(!details.has_semantic_markers);
        assert!(!result.passed);
        assert!(result.confidence < 1.0);
    }

    #[test]
    fn test_semantic_markers() {
        let md = "# Heading\n\n- item\n1. first\n\n[link](https://x.y)\n\n| a | b |\n|---|---|\n";
        let markers = semantic_markers(md);
        for m in ["headings", "lists", "links", "tables"] {
            assert!(markers.contains(&m.to_string()), "missing {m}");
        }
        assert!(semantic_markers("plain").is_empty());
    }
}
