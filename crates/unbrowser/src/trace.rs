//! Decision traces: the audit of every tier, selector and title attempt made
//! for one acquisition call.
//!
//! The summary is always recomputed from the attempt lists by
//! [`compute_trace_summary`]; nothing updates it by hand. A trace is built
//! once per call, handed to the caller and never persisted.

use serde::{Deserialize, Serialize};

use crate::types::Tier;
use crate::validation::ValidationDetails;

/// Coarse failure class for a tier attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network/timeout/5xx, retried before giving up.
    Transient,
    /// Auth, block, 4xx or unsupported. Escalated immediately.
    Permanent,
    /// The tier answered but the content failed validation.
    Validation,
    /// The per-tier time budget ran out.
    Timeout,
}

/// One tier execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAttempt {
    pub tier: Tier,
    pub success: bool,
    pub duration_ms: u64,
    pub failure_reason: Option<String>,
    pub failure_class: Option<FailureClass>,
    pub extraction_strategy: Option<String>,
    pub validation_details: Option<ValidationDetails>,
    /// Calls made, including retries.
    pub calls: u32,
    /// Whether the execution was routed through a proxy.
    pub proxied: bool,
}

impl TierAttempt {
    pub fn succeeded(tier: Tier, duration_ms: u64) -> Self {
        Self {
            tier,
            success: true,
            duration_ms,
            failure_reason: None,
            failure_class: None,
            extraction_strategy: None,
            validation_details: None,
            calls: 1,
            proxied: false,
        }
    }

    pub fn failed(tier: Tier, duration_ms: u64, class: FailureClass, reason: impl Into<String>) -> Self {
        Self {
            tier,
            success: false,
            duration_ms,
            failure_reason: Some(reason.into()),
            failure_class: Some(class),
            extraction_strategy: None,
            validation_details: None,
            calls: 1,
            proxied: false,
        }
    }
}

/// One content-selector candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorAttempt {
    pub tier: Tier,
    pub selector: String,
    pub source: String,
    pub matched: bool,
    pub content_length: usize,
    pub confidence_score: f64,
    pub selected: bool,
    pub skip_reason: Option<String>,
}

/// One title-extraction candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleAttempt {
    pub tier: Tier,
    pub source: String,
    pub value: Option<String>,
    pub matched: bool,
    pub confidence_score: f64,
    pub selected: bool,
    pub skip_reason: Option<String>,
}

/// Summary derived from the attempt lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub tiers_attempted: usize,
    pub tiers_failed: usize,
    pub selectors_attempted: usize,
    /// True iff the winning selector or title was not the first candidate tried.
    pub fallback_used: bool,
    /// The successful tier, or the default tier when nothing succeeded.
    pub final_tier: Tier,
    pub final_selector: Option<String>,
    pub final_title_source: Option<String>,
}

/// Compute the summary for a set of attempts.
pub fn compute_trace_summary(
    tiers: &[TierAttempt],
    selectors: &[SelectorAttempt],
    titles: &[TitleAttempt],
) -> TraceSummary {
    let selected_selector = selectors.iter().position(|s| s.selected);
    let selected_title = titles.iter().position(|t| t.selected);

    let fallback_used = selected_selector.map(|i| i > 0).unwrap_or(false)
        || selected_title.map(|i| i > 0).unwrap_or(false);

    let final_tier = tiers
        .iter()
        .rev()
        .find(|t| t.success)
        .map(|t| t.tier)
        .unwrap_or_default();

    TraceSummary {
        tiers_attempted: tiers.len(),
        tiers_failed: tiers.iter().filter(|t| !t.success).count(),
        selectors_attempted: selectors.len(),
        fallback_used,
        final_tier,
        final_selector: selected_selector.map(|i| selectors[i].selector.clone()),
        final_title_source: selected_title.map(|i| titles[i].source.clone()),
    }
}

/// Immutable decision trace returned with every acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionTrace {
    tier_attempts: Vec<TierAttempt>,
    selector_attempts: Vec<SelectorAttempt>,
    title_attempts: Vec<TitleAttempt>,
    summary: TraceSummary,
}

impl DecisionTrace {
    pub fn tier_attempts(&self) -> &[TierAttempt] {
        &self.tier_attempts
    }

    pub fn selector_attempts(&self) -> &[SelectorAttempt] {
        &self.selector_attempts
    }

    pub fn title_attempts(&self) -> &[TitleAttempt] {
        &self.title_attempts
    }

    pub fn summary(&self) -> &TraceSummary {
        &self.summary
    }

    /// Tiers in the order they were tried.
    pub fn tiers(&self) -> Vec<Tier> {
        self.tier_attempts.iter().map(|a| a.tier).collect()
    }
}

/// Accumulates attempts during a single acquisition.
#[derive(Debug, Default)]
pub struct DecisionTraceBuilder {
    tier_attempts: Vec<TierAttempt>,
    selector_attempts: Vec<SelectorAttempt>,
    title_attempts: Vec<TitleAttempt>,
}

impl DecisionTraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tier(&mut self, attempt: TierAttempt) {
        self.tier_attempts.push(attempt);
    }

    pub fn record_selectors(&mut self, attempts: impl IntoIterator<Item = SelectorAttempt>) {
        self.selector_attempts.extend(attempts);
    }

    pub fn record_titles(&mut self, attempts: impl IntoIterator<Item = TitleAttempt>) {
        self.title_attempts.extend(attempts);
    }

    pub fn tiers_attempted(&self) -> usize {
        self.tier_attempts.len()
    }

    pub fn last_failure(&self) -> Option<&str> {
        self.tier_attempts
            .iter()
            .rev()
            .find_map(|a| a.failure_reason.as_deref())
    }

    pub fn build(self) -> DecisionTrace {
        let summary = compute_trace_summary(
            &self.tier_attempts,
            &self.selector_attempts,
            &self.title_attempts,
        );
        DecisionTrace {
            tier_attempts: self.tier_attempts,
            selector_attempts: self.selector_attempts,
            title_attempts: self.title_attempts,
            summary,
        }
    }
}
