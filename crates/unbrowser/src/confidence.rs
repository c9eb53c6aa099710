//! Confidence engine: converts raw extraction signals into normalized scores.
//!
//! # Model
//!
//! Every extracted field carries a [`FieldConfidence`]: a score in `[0, 1]`
//! seeded from a fixed prior per [`ExtractionSource`], then nudged by
//! validation outcomes via [`boost`]. Multiple fields are combined with a
//! weighted geometric mean ([`aggregate`]), so a single weak field drags the
//! whole result down far more than an arithmetic mean would.
//!
//! The [`ConfidenceLevel`] band is always derived from the score and never
//! stored, so the two cannot drift apart.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::provenance::{DecayEvent, DecayReason, ProvenanceMetadata, MAX_DECAY_HISTORY};

/// Default adjustment applied by [`boost`].
pub const DEFAULT_BOOST: f64 = 0.1;

/// Floor used before taking logarithms in [`aggregate`].
const LOG_EPSILON: f64 = 0.001;

/// Discrete confidence band derived from a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLevel::VeryLow => "very_low",
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
            ConfidenceLevel::VeryHigh => "very_high",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an extracted value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    StructuredData,
    ApiResponse,
    Graphql,
    FrameworkData,
    SelectorMatch,
    LearnedPattern,
    MetaTags,
    Heuristic,
    Fallback,
    Unknown,
}

impl ExtractionSource {
    /// Baseline score before any validation-driven adjustment.
    pub fn prior(self) -> f64 {
        match self {
            ExtractionSource::StructuredData | ExtractionSource::ApiResponse => 0.95,
            ExtractionSource::Graphql | ExtractionSource::FrameworkData => 0.90,
            ExtractionSource::SelectorMatch => 0.75,
            ExtractionSource::LearnedPattern => 0.70,
            ExtractionSource::MetaTags => 0.65,
            ExtractionSource::Heuristic => 0.50,
            ExtractionSource::Fallback => 0.30,
            ExtractionSource::Unknown => 0.20,
        }
    }

    /// Candidate priority (lower is tried first): structured data, then
    /// framework-embedded state, then specific selectors, then generic
    /// containers, then the body fallback.
    pub fn rank(self) -> u8 {
        match self {
            ExtractionSource::StructuredData => 0,
            ExtractionSource::ApiResponse => 1,
            ExtractionSource::Graphql => 2,
            ExtractionSource::FrameworkData => 3,
            ExtractionSource::SelectorMatch => 4,
            ExtractionSource::LearnedPattern => 5,
            ExtractionSource::MetaTags => 6,
            ExtractionSource::Heuristic => 7,
            ExtractionSource::Fallback => 8,
            ExtractionSource::Unknown => 9,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionSource::StructuredData => "structured_data",
            ExtractionSource::ApiResponse => "api_response",
            ExtractionSource::Graphql => "graphql",
            ExtractionSource::FrameworkData => "framework_data",
            ExtractionSource::SelectorMatch => "selector_match",
            ExtractionSource::LearnedPattern => "learned_pattern",
            ExtractionSource::MetaTags => "meta_tags",
            ExtractionSource::Heuristic => "heuristic",
            ExtractionSource::Fallback => "fallback",
            ExtractionSource::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ExtractionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence attached to a single extracted field.
///
/// Serializes with a derived `level` field; deserialization ignores it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldConfidence {
    pub score: f64,
    pub source: ExtractionSource,
    #[serde(default)]
    pub reason: Option<String>,
}

impl FieldConfidence {
    /// Build a confidence, clamping the score to `[0, 1]`.
    pub fn new(score: f64, source: ExtractionSource, reason: Option<String>) -> Self {
        Self {
            score: clamp_score(score),
            source,
            reason,
        }
    }

    pub fn level(&self) -> ConfidenceLevel {
        score_to_level(self.score)
    }
}

impl Serialize for FieldConfidence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("FieldConfidence", 4)?;
        state.serialize_field("score", &self.score)?;
        state.serialize_field("level", &self.level())?;
        state.serialize_field("source", &self.source)?;
        state.serialize_field("reason", &self.reason)?;
        state.end()
    }
}

/// Clamp to `[0, 1]`, mapping NaN to 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Map a score to its band: very_high ≥ 0.9, high ≥ 0.7, medium ≥ 0.5,
/// low ≥ 0.3, else very_low.
pub fn score_to_level(score: f64) -> ConfidenceLevel {
    let score = clamp_score(score);
    if score >= 0.9 {
        ConfidenceLevel::VeryHigh
    } else if score >= 0.7 {
        ConfidenceLevel::High
    } else if score >= 0.5 {
        ConfidenceLevel::Medium
    } else if score >= 0.3 {
        ConfidenceLevel::Low
    } else {
        ConfidenceLevel::VeryLow
    }
}

/// Confidence seeded from the fixed prior for `source`.
pub fn from_source(source: ExtractionSource, reason: Option<&str>) -> FieldConfidence {
    FieldConfidence::new(source.prior(), source, reason.map(str::to_string))
}

/// Raise (on pass) or lower (on fail) a confidence by `amount`, clamped to
/// `[0, 1]`. The prior reason is kept and the adjustment appended after `;`.
pub fn boost(confidence: &FieldConfidence, validation_passed: bool, amount: f64) -> FieldConfidence {
    let amount = amount.abs();
    let (delta, note) = if validation_passed {
        (amount, format!("validation passed (+{amount:.2})"))
    } else {
        (-amount, format!("validation failed (-{amount:.2})"))
    };
    let reason = match &confidence.reason {
        Some(prior) if !prior.is_empty() => format!("{prior}; {note}"),
        _ => note,
    };
    FieldConfidence::new(confidence.score + delta, confidence.source, Some(reason))
}

/// Combine field confidences with a weighted geometric mean in log space:
/// `exp(Σ wᵢ·ln(max(scoreᵢ, ε)))`, weights normalized to sum to 1.
///
/// Missing weights default to uniform; negative weights count as zero. The
/// result's source is the lowest-scoring input's source, since that field
/// limits overall trust.
pub fn aggregate(confidences: &[FieldConfidence], weights: Option<&[f64]>) -> FieldConfidence {
    if confidences.is_empty() {
        return FieldConfidence::new(
            0.0,
            ExtractionSource::Unknown,
            Some("no field confidences to aggregate".to_string()),
        );
    }

    let raw: Vec<f64> = match weights {
        Some(w) => (0..confidences.len())
            .map(|i| w.get(i).copied().unwrap_or(0.0).max(0.0))
            .collect(),
        None => vec![1.0; confidences.len()],
    };
    let total: f64 = raw.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return FieldConfidence::new(
            0.0,
            ExtractionSource::Unknown,
            Some("zero total weight; nothing to aggregate".to_string()),
        );
    }

    let log_sum: f64 = confidences
        .iter()
        .zip(&raw)
        .map(|(c, w)| (w / total) * clamp_score(c.score).max(LOG_EPSILON).ln())
        .sum();

    let limiting = confidences
        .iter()
        .zip(&raw)
        .filter(|(_, w)| **w > 0.0)
        .map(|(c, _)| c)
        .min_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or(&confidences[0]);

    FieldConfidence::new(
        log_sum.exp(),
        limiting.source,
        Some(format!(
            "geometric mean of {} fields; limited by {} ({:.2})",
            confidences.len(),
            limiting.source,
            limiting.score
        )),
    )
}

/// Record a confidence reduction on a provenance record.
///
/// The new event is prepended (most-recent-first) and the history truncated
/// to the most recent [`MAX_DECAY_HISTORY`] entries. Older events are dropped,
/// never merged.
pub fn decay(
    provenance: &ProvenanceMetadata,
    reason: DecayReason,
    previous_confidence: f64,
    new_confidence: f64,
    details: Option<&str>,
) -> ProvenanceMetadata {
    let event = DecayEvent {
        timestamp: chrono::Utc::now(),
        reason,
        previous_confidence: clamp_score(previous_confidence),
        new_confidence: clamp_score(new_confidence),
        details: details.map(str::to_string),
    };
    tracing::debug!(
        "decay event {}: {:.3} -> {:.3}",
        reason,
        event.previous_confidence,
        event.new_confidence
    );

    let mut updated = provenance.clone();
    updated.decay_history.insert(0, event);
    updated.decay_history.truncate(MAX_DECAY_HISTORY);
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::{self, ProvenanceOptions, ProvenanceSource};

    fn conf(score: f64, source: ExtractionSource) -> FieldConfidence {
        FieldConfidence::new(score, source, None)
    }

    #[test]
    fn test_level_bands_partition_unit_interval() {
        assert_eq!(score_to_level(1.0), ConfidenceLevel::VeryHigh);
        assert_eq!(score_to_level(0.9), ConfidenceLevel::VeryHigh);
        assert_eq!(score_to_level(0.8999), ConfidenceLevel::High);
        assert_eq!(score_to_level(0.7), ConfidenceLevel::High);
        assert_eq!(score_to_level(0.6999), ConfidenceLevel::Medium);
        assert_eq!(score_to_level(0.5), ConfidenceLevel::Medium);
        assert_eq!(score_to_level(0.4999), ConfidenceLevel::Low);
        assert_eq!(score_to_level(0.3), ConfidenceLevel::Low);
        assert_eq!(score_to_level(0.2999), ConfidenceLevel::VeryLow);
        assert_eq!(score_to_level(0.0), ConfidenceLevel::VeryLow);
    }

    #[test]
    fn test_level_is_monotonic() {
        let mut prev = score_to_level(0.0);
        for i in 1..=1000 {
            let level = score_to_level(i as f64 / 1000.0);
            assert!(level >= prev, "level decreased at {i}");
            prev = level;
        }
    }

    #[test]
    fn test_priors() {
        assert_eq!(from_source(ExtractionSource::StructuredData, None).score, 0.95);
        assert_eq!(from_source(ExtractionSource::ApiResponse, None).score, 0.95);
        assert_eq!(from_source(ExtractionSource::Graphql, None).score, 0.90);
        assert_eq!(from_source(ExtractionSource::FrameworkData, None).score, 0.90);
        assert_eq!(from_source(ExtractionSource::SelectorMatch, None).score, 0.75);
        assert_eq!(from_source(ExtractionSource::LearnedPattern, None).score, 0.70);
        assert_eq!(from_source(ExtractionSource::MetaTags, None).score, 0.65);
        assert_eq!(from_source(ExtractionSource::Heuristic, None).score, 0.50);
        assert_eq!(from_source(ExtractionSource::Fallback, None).score, 0.30);
        assert_eq!(from_source(ExtractionSource::Unknown, None).score, 0.20);
        let c = from_source(ExtractionSource::MetaTags, Some("og:title"));
        assert_eq!(c.reason.as_deref(), Some("og:title"));
    }

    #[test]
    fn test_boost_pass_and_clamp() {
        let boosted = boost(&conf(0.7, ExtractionSource::SelectorMatch), true, DEFAULT_BOOST);
        assert!((boosted.score - 0.8).abs() < 1e-10);
        assert_eq!(boosted.level(), ConfidenceLevel::High);

        let capped = boost(&conf(0.95, ExtractionSource::SelectorMatch), true, DEFAULT_BOOST);
        assert_eq!(capped.score, 1.0);
        let capped = boost(&conf(0.9, ExtractionSource::SelectorMatch), true, DEFAULT_BOOST);
        assert_eq!(capped.score, 1.0);
    }

    #[test]
    fn test_boost_fail_never_negative() {
        let lowered = boost(&conf(0.05, ExtractionSource::Heuristic), false, DEFAULT_BOOST);
        assert_eq!(lowered.score, 0.0);
        assert_eq!(lowered.level(), ConfidenceLevel::VeryLow);
    }

    #[test]
    fn test_boost_keeps_prior_reason() {
        let seeded = from_source(ExtractionSource::SelectorMatch, Some("matched article"));
        let boosted = boost(&seeded, true, DEFAULT_BOOST);
        let reason = boosted.reason.unwrap();
        assert!(reason.starts_with("matched article; "));
        assert!(reason.contains("validation passed"));
    }

    #[test]
    fn test_aggregate_geometric_mean() {
        let result = aggregate(
            &[
                conf(0.9, ExtractionSource::StructuredData),
                conf(0.6, ExtractionSource::Heuristic),
            ],
            None,
        );
        let geometric = (0.9f64 * 0.6).sqrt();
        assert!(result.score > 0.6 && result.score < 0.9);
        assert!((result.score - geometric).abs() < 1e-9);
        assert!((result.score - geometric).abs() < (result.score - 0.75).abs());
        assert_eq!(result.source, ExtractionSource::Heuristic);
        assert!(result.reason.unwrap().contains("heuristic"));
    }

    #[test]
    fn test_aggregate_weights_are_normalized() {
        let inputs = [
            conf(0.9, ExtractionSource::ApiResponse),
            conf(0.5, ExtractionSource::Heuristic),
        ];
        let a = aggregate(&inputs, Some(&[3.0, 1.0]));
        let b = aggregate(&inputs, Some(&[0.75, 0.25]));
        assert!((a.score - b.score).abs() < 1e-12);
        let expected = (0.75 * 0.9f64.ln() + 0.25 * 0.5f64.ln()).exp();
        assert!((a.score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_empty() {
        let result = aggregate(&[], None);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.source, ExtractionSource::Unknown);
        assert!(result.reason.is_some());
    }

    #[test]
    fn test_aggregate_zero_weights() {
        let result = aggregate(
            &[
                conf(0.9, ExtractionSource::ApiResponse),
                conf(0.8, ExtractionSource::SelectorMatch),
            ],
            Some(&[0.0, 0.0]),
        );
        assert_eq!(result.score, 0.0);
        assert_eq!(result.source, ExtractionSource::Unknown);
        assert!(result.reason.unwrap().contains("zero total weight"));
    }

    #[test]
    fn test_aggregate_zero_score_does_not_blow_up() {
        let result = aggregate(
            &[
                conf(0.0, ExtractionSource::Fallback),
                conf(1.0, ExtractionSource::ApiResponse),
            ],
            None,
        );
        assert!(result.score.is_finite());
        assert!(result.score > 0.0 && result.score < 0.05);
    }

    #[test]
    fn test_serialized_level_is_derived() {
        let c = conf(0.72, ExtractionSource::SelectorMatch);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["level"], "high");
        let back: FieldConfidence = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_decay_prepends_and_caps_history() {
        let mut prov = provenance::create(ProvenanceSource::Bootstrap, ProvenanceOptions::default());
        for i in 0..15 {
            let prev = 1.0 - i as f64 * 0.05;
            prov = decay(
                &prov,
                DecayReason::RepeatedFailures,
                prev,
                prev - 0.05,
                Some(&format!("event {i}")),
            );
        }
        assert_eq!(prov.decay_history.len(), MAX_DECAY_HISTORY);
        assert_eq!(prov.decay_history[0].details.as_deref(), Some("event 14"));
        assert_eq!(prov.decay_history[9].details.as_deref(), Some("event 5"));
    }
}
