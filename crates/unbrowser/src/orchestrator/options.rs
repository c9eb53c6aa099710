//! Caller-facing request options and response types.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::confidence::FieldConfidence;
use crate::error::AcquireFailure;
use crate::tier::DiscoveredApi;
use crate::trace::DecisionTrace;
use crate::types::Tier;
use crate::validation::{VerificationResult, VerifyOptions};

/// Rendition of the returned content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    #[default]
    Markdown,
    Text,
}

impl ContentFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentFormat::Markdown => "markdown",
            ContentFormat::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquireOptions {
    /// Overall latency budget. Falls back to the engine default.
    pub max_latency_ms: Option<u64>,
    /// The most expensive tier the call may escalate to.
    pub max_cost_tier: Tier,
    pub verify: VerifyOptions,
    /// Truncate returned content to this many characters.
    pub max_chars: Option<usize>,
    pub content_type: ContentFormat,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            max_latency_ms: None,
            max_cost_tier: Tier::Playwright,
            verify: VerifyOptions::default(),
            max_chars: None,
            content_type: ContentFormat::Markdown,
        }
    }
}

/// Successful acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquiredContent {
    pub url: String,
    pub final_url: String,
    pub domain: String,
    pub tier: Tier,
    /// Extracted content in `content_type` format.
    pub content: String,
    pub content_type: ContentFormat,
    pub title: Option<String>,
    /// Whether `content` was cut to `max_chars`.
    pub truncated: bool,
    /// `"{source}:{selector}"` of the winning content candidate.
    pub extraction_strategy: String,
    pub content_confidence: FieldConfidence,
    pub title_confidence: Option<FieldConfidence>,
    /// Weighted aggregate of the field confidences.
    pub confidence: FieldConfidence,
    pub verification: VerificationResult,
    pub tiers_attempted: Vec<Tier>,
    pub discovered_apis: Vec<DiscoveredApi>,
    pub proxied: bool,
    pub load_time_ms: u64,
}

/// Result of one `acquire` call. The trace is present on success and failure.
#[derive(Debug, Clone)]
pub struct AcquireResponse {
    pub result: Result<AcquiredContent, AcquireFailure>,
    pub trace: DecisionTrace,
}

impl AcquireResponse {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn content(&self) -> Option<&AcquiredContent> {
        self.result.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&AcquireFailure> {
        self.result.as_ref().err()
    }
}

impl Serialize for AcquireResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AcquireResponse", 3)?;
        state.serialize_field("success", &self.is_success())?;
        match &self.result {
            Ok(content) => state.serialize_field("content", content)?,
            Err(failure) => state.serialize_field("error", failure)?,
        }
        state.serialize_field("trace", &self.trace)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::DecisionTraceBuilder;
    use crate::validation::VerificationMode;

    #[test]
    fn test_options_defaults_and_partial_json() {
        let opts = AcquireOptions::default();
        assert_eq!(opts.max_cost_tier, Tier::Playwright);
        assert!(opts.verify.enabled);

        let parsed: AcquireOptions =
            serde_json::from_str(r#"{"max_cost_tier": "lightweight", "verify": {"mode": "thorough"}}"#)
                .unwrap();
        assert_eq!(parsed.max_cost_tier, Tier::Lightweight);
        assert_eq!(parsed.verify.mode, VerificationMode::Thorough);
        assert!(parsed.verify.enabled);
        assert_eq!(parsed.max_latency_ms, None);
        assert_eq!(parsed.content_type, ContentFormat::Markdown);

        let text: AcquireOptions = serde_json::from_str(r#"{"content_type": "text"}"#).unwrap();
        assert_eq!(text.content_type, ContentFormat::Text);
    }

    #[test]
    fn test_failed_response_serializes_error_and_trace() {
        let response = AcquireResponse {
            result: Err(AcquireFailure::Exhausted {
                attempted: 0,
                max_cost_tier: Tier::Lightweight,
                reason: "nothing worked".into(),
            }),
            trace: DecisionTraceBuilder::new().build(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "exhausted");
        assert_eq!(json["trace"]["summary"]["tiers_attempted"], 0);
        assert!(json.get("content").is_none());
    }
}
