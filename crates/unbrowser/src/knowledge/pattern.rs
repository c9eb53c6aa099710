//! Learned patterns, observations and the per-domain record that holds them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::confidence::{score_to_level, ConfidenceLevel};
use crate::error::FailureKind;
use crate::provenance::{ProvenanceMetadata, ProvenanceSource};
use crate::types::{page_of, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Api,
    Selector,
    Quirk,
}

impl PatternKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternKind::Api => "api",
            PatternKind::Selector => "selector",
            PatternKind::Quirk => "quirk",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known site behaviour that changes how a tier should approach a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Quirk {
    RateLimited {
        #[serde(default)]
        retry_after_secs: Option<u64>,
    },
    AuthRequired,
    AntiBot,
    RequiresJavascript,
}

impl Quirk {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quirk::RateLimited { .. } => "rate_limited",
            Quirk::AuthRequired => "auth_required",
            Quirk::AntiBot => "anti_bot",
            Quirk::RequiresJavascript => "requires_javascript",
        }
    }

    /// The quirk implied by a tier failure, if any.
    pub fn from_failure(kind: FailureKind, retry_after_secs: Option<u64>) -> Option<Self> {
        match kind {
            FailureKind::RateLimited => Some(Quirk::RateLimited { retry_after_secs }),
            FailureKind::AuthRequired => Some(Quirk::AuthRequired),
            FailureKind::Blocked => Some(Quirk::AntiBot),
            _ => None,
        }
    }
}

/// Strategy-specific data, one variant per pattern kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternPayload {
    Api {
        endpoint: String,
        method: String,
        #[serde(default)]
        content_type: Option<String>,
    },
    Selector {
        selector: String,
        #[serde(default)]
        title_source: Option<String>,
    },
    Quirk {
        quirk: Quirk,
    },
}

impl PatternPayload {
    pub fn kind(&self) -> PatternKind {
        match self {
            PatternPayload::Api { .. } => PatternKind::Api,
            PatternPayload::Selector { .. } => PatternKind::Selector,
            PatternPayload::Quirk { .. } => PatternKind::Quirk,
        }
    }

    /// Identity of the pattern within its domain. Two observations with the
    /// same key describe the same pattern.
    pub fn logical_key(&self, tier: Tier) -> String {
        match self {
            PatternPayload::Api { endpoint, method, .. } => {
                format!("api:{} {}", method.to_ascii_uppercase(), endpoint)
            }
            PatternPayload::Selector { selector, .. } => format!("selector:{tier}:{selector}"),
            PatternPayload::Quirk { quirk } => format!("quirk:{}", quirk.as_str()),
        }
    }
}

/// A learned, reusable acquisition shortcut for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: Uuid,
    pub domain: String,
    /// The tier whose success established this pattern.
    pub tier: Tier,
    pub key: String,
    pub payload: PatternPayload,
    pub confidence: f64,
    pub provenance: ProvenanceMetadata,
    #[serde(default)]
    pub failure_streak: u32,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
}

impl Pattern {
    pub fn kind(&self) -> PatternKind {
        self.payload.kind()
    }

    pub fn level(&self) -> ConfidenceLevel {
        score_to_level(self.confidence)
    }

    /// Whether this pattern may serve `url`. An API endpoint discovered on a
    /// page answers for that page only; everything else is domain-wide.
    pub fn applies_to(&self, url: &str) -> bool {
        match (&self.payload, &self.provenance.source_url) {
            (PatternPayload::Api { .. }, Some(source)) => {
                let page = page_of(source);
                page.is_some() && page == page_of(url)
            }
            _ => true,
        }
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure { kind: FailureKind, reason: String },
}

/// One fact reported back to the knowledge base after a tier ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub tier: Tier,
    /// The pattern this observation is about. `None` applies a failure to
    /// every active non-quirk pattern of `tier` that serves `source_url`.
    pub payload: Option<PatternPayload>,
    pub outcome: Outcome,
    /// Confidence to start a brand-new pattern at.
    pub confidence: Option<f64>,
    pub source: ProvenanceSource,
    pub source_url: Option<String>,
    pub duration_ms: Option<u64>,
}

impl Observation {
    pub fn success(tier: Tier, payload: PatternPayload) -> Self {
        Self {
            tier,
            payload: Some(payload),
            outcome: Outcome::Success,
            confidence: None,
            source: ProvenanceSource::Unknown,
            source_url: None,
            duration_ms: None,
        }
    }

    pub fn failure(tier: Tier, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            tier,
            payload: None,
            outcome: Outcome::Failure {
                kind,
                reason: reason.into(),
            },
            confidence: None,
            source: ProvenanceSource::Unknown,
            source_url: None,
            duration_ms: None,
        }
    }

    pub fn with_payload(mut self, payload: PatternPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_source(mut self, source: ProvenanceSource, url: Option<String>) -> Self {
        self.source = source;
        self.source_url = url;
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }
}

/// Per-tier counters for one domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub attempts: u64,
    pub successes: u64,
    pub total_duration_ms: u64,
}

impl TierStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    pub fn mean_duration_ms(&self) -> Option<u64> {
        (self.attempts > 0).then(|| self.total_duration_ms / self.attempts)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub at: DateTime<Utc>,
    pub tier: Tier,
    pub kind: FailureKind,
    pub reason: String,
}

/// Everything learned about one domain. Persisted as a single record so a
/// write is all-or-nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainKnowledge {
    pub domain: String,
    /// Incremented on every write.
    pub version: u64,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub archived: Vec<Pattern>,
    #[serde(default)]
    pub tier_stats: BTreeMap<Tier, TierStats>,
    /// Most recent first.
    #[serde(default)]
    pub recent_failures: Vec<FailureRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DomainKnowledge {
    pub fn new(domain: &str) -> Self {
        let now = Utc::now();
        Self {
            domain: domain.to_string(),
            version: 0,
            patterns: Vec::new(),
            archived: Vec::new(),
            tier_stats: BTreeMap::new(),
            recent_failures: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn active(&self, key: &str) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.key == key)
    }

    pub fn quirks(&self) -> impl Iterator<Item = &Quirk> {
        self.patterns.iter().filter_map(|p| match &p.payload {
            PatternPayload::Quirk { quirk } => Some(quirk),
            _ => None,
        })
    }

    /// Highest-confidence active non-quirk pattern, optionally restricted to
    /// one tier. Ties go to the cheaper tier.
    pub fn best_pattern(&self, tier: Option<Tier>) -> Option<&Pattern> {
        self.patterns
            .iter()
            .filter(|p| p.kind() != PatternKind::Quirk)
            .filter(|p| tier.map(|t| p.tier == t).unwrap_or(true))
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then_with(|| b.tier.cmp(&a.tier))
            })
    }

    /// Like [`best_pattern`](Self::best_pattern), skipping patterns that
    /// do not serve `url`.
    pub fn best_pattern_for(&self, url: &str, tier: Option<Tier>) -> Option<&Pattern> {
        self.patterns
            .iter()
            .filter(|p| p.kind() != PatternKind::Quirk)
            .filter(|p| tier.map(|t| p.tier == t).unwrap_or(true))
            .filter(|p| p.applies_to(url))
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then_with(|| b.tier.cmp(&a.tier))
            })
    }

    pub fn overall_success_rate(&self) -> f64 {
        let (attempts, successes) = self
            .tier_stats
            .values()
            .fold((0u64, 0u64), |(a, s), st| (a + st.attempts, s + st.successes));
        if attempts == 0 {
            0.0
        } else {
            successes as f64 / attempts as f64
        }
    }
}

/// Summary of what the engine knows about a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainIntelligence {
    pub domain: String,
    pub known_patterns: usize,
    pub selector_patterns: usize,
    pub api_patterns: usize,
    pub archived_patterns: usize,
    pub quirks: Vec<Quirk>,
    pub recent_failures: usize,
    pub success_rate: f64,
    /// The tier of the strongest learned pattern.
    pub preferred_tier: Option<Tier>,
    /// Cheapest tier expected to work given patterns and quirks.
    pub recommended_tier: Tier,
    pub should_use_session: bool,
    pub last_activity: Option<DateTime<Utc>>,
}
