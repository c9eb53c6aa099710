//! Dry-run planning: what `acquire` would do for a URL, how long it should
//! take and how likely it is to work, without executing any tier.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{plan_tier_order, AcquireOptions, TierOrchestrator};
use crate::confidence::ConfidenceLevel;
use crate::error::AcquireFailure;
use crate::knowledge::{DomainKnowledge, PatternKind, Quirk};
use crate::types::Tier;

pub const PREVIEW_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceRating {
    Low,
    Medium,
    High,
}

impl ConfidenceRating {
    fn success_probability(self) -> f64 {
        match self {
            ConfidenceRating::High => 0.9,
            ConfidenceRating::Medium => 0.6,
            ConfidenceRating::Low => 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainFamiliarity {
    High,
    Medium,
    Low,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub order: u32,
    pub action: String,
    pub description: String,
    pub tier: Tier,
    pub expected_duration_ms: u64,
    pub confidence: ConfidenceRating,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub steps: Vec<ExecutionStep>,
    pub tier: Tier,
    pub reasoning: String,
    pub fallback_plan: Option<Box<ExecutionPlan>>,
}

impl ExecutionPlan {
    /// Tiers of this plan and its fallbacks, in order.
    pub fn tiers(&self) -> Vec<Tier> {
        let mut out = vec![self.tier];
        let mut next = self.fallback_plan.as_deref();
        while let Some(plan) = next {
            out.push(plan.tier);
            next = plan.fallback_plan.as_deref();
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEstimate {
    pub min_ms: u64,
    pub max_ms: u64,
    pub expected_ms: u64,
    pub breakdown: BTreeMap<Tier, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    pub has_learned_patterns: bool,
    pub domain_familiarity: DomainFamiliarity,
    pub api_discovered: bool,
    pub requires_auth: bool,
    pub bot_detection_likely: bool,
    pub pattern_count: usize,
    pub pattern_success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewConfidence {
    pub overall: ConfidenceRating,
    pub factors: ConfidenceFactors,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowsePreview {
    pub schema_version: String,
    pub plan: ExecutionPlan,
    pub estimated_time: TimeEstimate,
    pub confidence: PreviewConfidence,
    #[serde(default)]
    pub alternative_plans: Vec<ExecutionPlan>,
}

struct StepEstimate {
    tier: Tier,
    duration_ms: u64,
    rating: ConfidenceRating,
    reason: String,
}

fn rating_for_level(level: ConfidenceLevel) -> ConfidenceRating {
    match level {
        ConfidenceLevel::VeryHigh | ConfidenceLevel::High => ConfidenceRating::High,
        ConfidenceLevel::Medium => ConfidenceRating::Medium,
        ConfidenceLevel::Low | ConfidenceLevel::VeryLow => ConfidenceRating::Low,
    }
}

fn action_for(tier: Tier) -> (&'static str, &'static str) {
    match tier {
        Tier::Intelligence => ("api_call", "Fetch through a learned pattern or discovered API"),
        Tier::Lightweight => ("http_fetch", "Plain HTTP fetch with static extraction"),
        Tier::Playwright => ("render", "Render the page in a headless browser"),
    }
}

fn familiarity(record: Option<&DomainKnowledge>) -> DomainFamiliarity {
    let attempts: u64 = record
        .map(|r| r.tier_stats.values().map(|s| s.attempts).sum())
        .unwrap_or(0);
    match attempts {
        0 => DomainFamiliarity::None,
        1..=2 => DomainFamiliarity::Low,
        3..=9 => DomainFamiliarity::Medium,
        _ => DomainFamiliarity::High,
    }
}

fn build_plan(steps: &[StepEstimate], reasoning: &str) -> Option<ExecutionPlan> {
    let (first, rest) = steps.split_first()?;
    let (action, description) = action_for(first.tier);
    Some(ExecutionPlan {
        steps: vec![ExecutionStep {
            order: 1,
            action: action.to_string(),
            description: description.to_string(),
            tier: first.tier,
            expected_duration_ms: first.duration_ms,
            confidence: first.rating,
            reason: Some(first.reason.clone()),
        }],
        tier: first.tier,
        reasoning: reasoning.to_string(),
        fallback_plan: build_plan(rest, &format!("{} failed, escalate", first.tier)).map(Box::new),
    })
}

impl TierOrchestrator {
    fn estimate_tier(&self, tier: Tier, url: &str, record: Option<&DomainKnowledge>) -> StepEstimate {
        let stats = record.and_then(|r| r.tier_stats.get(&tier));
        let duration_ms = stats
            .and_then(|s| s.mean_duration_ms())
            .unwrap_or_else(|| self.config.expected_tier_ms.get(tier));
        let quirks: Vec<&Quirk> = record.map(|r| r.quirks().collect()).unwrap_or_default();

        let (rating, reason) = if let Some(pattern) = record.and_then(|r| r.best_pattern_for(url, Some(tier))) {
            let mut rating = rating_for_level(pattern.level());
            if self.knowledge.is_stale(pattern) {
                rating = rating.min(ConfidenceRating::Medium);
            }
            (
                rating,
                format!("learned {} pattern at {:.2}", pattern.kind(), pattern.confidence),
            )
        } else if let Some(s) = stats.filter(|s| s.attempts > 0) {
            let rate = s.success_rate();
            let rating = if rate >= 0.8 {
                ConfidenceRating::High
            } else if rate >= 0.5 {
                ConfidenceRating::Medium
            } else {
                ConfidenceRating::Low
            };
            (rating, format!("{:.0}% success over {} attempts", rate * 100.0, s.attempts))
        } else {
            match tier {
                Tier::Intelligence => (ConfidenceRating::Low, "no learned API or pattern".to_string()),
                Tier::Lightweight
                    if quirks
                        .iter()
                        .any(|q| matches!(q, Quirk::RequiresJavascript | Quirk::AntiBot)) =>
                {
                    (ConfidenceRating::Low, "site needs a browser or blocks plain fetches".to_string())
                }
                _ => (ConfidenceRating::Medium, "no history for this domain".to_string()),
            }
        };

        StepEstimate {
            tier,
            duration_ms,
            rating,
            reason,
        }
    }

    /// Describe what `acquire` would do for `url` under `options`.
    pub async fn preview(
        &self,
        url: &str,
        options: &AcquireOptions,
    ) -> Result<BrowsePreview, AcquireFailure> {
        let domain = Self::validate_url(url)?;
        let record = self.load_record(&domain).await;
        let record = record.as_ref();

        let preferred = self.preferred_tier(record, url);
        let tiers: Vec<Tier> = plan_tier_order(preferred, options.max_cost_tier)
            .into_iter()
            .filter(|t| self.executors.contains_key(t))
            .collect();
        let steps: Vec<StepEstimate> = tiers.iter().map(|t| self.estimate_tier(*t, url, record)).collect();

        let reasoning = match preferred {
            Some(tier) if tiers.first() == Some(&tier) => {
                format!("high-confidence learned pattern favours {tier}")
            }
            _ => "no trusted pattern; cheapest tier first".to_string(),
        };
        let plan = build_plan(&steps, &reasoning).ok_or_else(|| AcquireFailure::Exhausted {
            attempted: 0,
            max_cost_tier: options.max_cost_tier,
            reason: "no tier executor available within the cost cap".to_string(),
        })?;

        let mut alternative_plans = Vec::new();
        if preferred.is_some() {
            let default_steps: Vec<StepEstimate> = Tier::up_to(options.max_cost_tier)
                .filter(|t| self.executors.contains_key(t))
                .map(|t| self.estimate_tier(t, url, record))
                .collect();
            if let Some(alt) = build_plan(&default_steps, "ignore learned patterns; cheapest tier first") {
                if alt.tiers() != plan.tiers() {
                    alternative_plans.push(alt);
                }
            }
        }

        let max_latency = options
            .max_latency_ms
            .unwrap_or(self.config.default_max_latency_ms);
        let mut reach = 1.0;
        let mut expected = 0.0;
        for step in &steps {
            expected += reach * step.duration_ms as f64;
            reach *= 1.0 - step.rating.success_probability();
        }
        let total: u64 = steps.iter().map(|s| s.duration_ms).sum();
        let estimated_time = TimeEstimate {
            min_ms: steps[0].duration_ms.min(max_latency),
            max_ms: total.min(max_latency),
            expected_ms: (expected.round() as u64).min(max_latency),
            breakdown: steps.iter().map(|s| (s.tier, s.duration_ms)).collect(),
        };

        let quirks: Vec<&Quirk> = record.map(|r| r.quirks().collect()).unwrap_or_default();
        let non_quirk: Vec<_> = record
            .map(|r| {
                r.patterns
                    .iter()
                    .filter(|p| p.kind() != PatternKind::Quirk)
                    .collect()
            })
            .unwrap_or_default();
        let pattern_success_rate = if non_quirk.is_empty() {
            0.0
        } else {
            non_quirk.iter().map(|p| p.success_rate()).sum::<f64>() / non_quirk.len() as f64
        };
        let factors = ConfidenceFactors {
            has_learned_patterns: !non_quirk.is_empty(),
            domain_familiarity: familiarity(record),
            api_discovered: non_quirk.iter().any(|p| p.kind() == PatternKind::Api),
            requires_auth: quirks.iter().any(|q| matches!(q, Quirk::AuthRequired)),
            bot_detection_likely: quirks
                .iter()
                .any(|q| matches!(q, Quirk::AntiBot | Quirk::RateLimited { .. })),
            pattern_count: non_quirk.len(),
            pattern_success_rate,
        };

        Ok(BrowsePreview {
            schema_version: PREVIEW_SCHEMA_VERSION.to_string(),
            confidence: PreviewConfidence {
                overall: steps[0].rating,
                factors,
            },
            plan,
            estimated_time,
            alternative_plans,
        })
    }
}
