//! Provenance tracking: how and when a learned fact was obtained and verified.
//!
//! All functions are pure: they take a record and return an updated copy.
//! The knowledge base is the only owner that persists the result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::confidence;

/// Maximum number of decay events kept per record (most recent first).
pub const MAX_DECAY_HISTORY: usize = 10;

/// How a fact entered the knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceSource {
    Bootstrap,
    ApiExtraction,
    OpenapiDiscovery,
    GraphqlIntrospection,
    DocsPageDetection,
    LinkDiscovery,
    BackendFingerprinting,
    CrossSiteTransfer,
    UserFeedback,
    Manual,
    Unknown,
}

/// Why a confidence was reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayReason {
    TimeDecay,
    RepeatedFailures,
    ValidationFailures,
    SiteStructureChanged,
    RateLimited,
    AuthExpired,
    PatternArchived,
    ManualDowngrade,
}

impl DecayReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DecayReason::TimeDecay => "time_decay",
            DecayReason::RepeatedFailures => "repeated_failures",
            DecayReason::ValidationFailures => "validation_failures",
            DecayReason::SiteStructureChanged => "site_structure_changed",
            DecayReason::RateLimited => "rate_limited",
            DecayReason::AuthExpired => "auth_expired",
            DecayReason::PatternArchived => "pattern_archived",
            DecayReason::ManualDowngrade => "manual_downgrade",
        }
    }
}

impl fmt::Display for DecayReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded confidence reduction. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayEvent {
    pub timestamp: DateTime<Utc>,
    pub reason: DecayReason,
    pub previous_confidence: f64,
    pub new_confidence: f64,
    #[serde(default)]
    pub details: Option<String>,
}

/// How/when a learned fact was obtained and verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceMetadata {
    pub source: ProvenanceSource,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub source_domain: Option<String>,
    #[serde(default)]
    pub source_pattern_id: Option<String>,
    pub learned_at: DateTime<Utc>,
    #[serde(default)]
    pub last_verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    pub verification_count: u32,
    /// Most recent first, capped at [`MAX_DECAY_HISTORY`].
    #[serde(default)]
    pub decay_history: Vec<DecayEvent>,
}

/// Optional origin details for [`create`].
#[derive(Debug, Clone, Default)]
pub struct ProvenanceOptions {
    pub source_url: Option<String>,
    pub source_domain: Option<String>,
    pub source_pattern_id: Option<String>,
}

/// Create a fresh record: all timestamps set to now, one verification.
pub fn create(source: ProvenanceSource, opts: ProvenanceOptions) -> ProvenanceMetadata {
    let now = Utc::now();
    ProvenanceMetadata {
        source,
        source_url: opts.source_url,
        source_domain: opts.source_domain,
        source_pattern_id: opts.source_pattern_id,
        learned_at: now,
        last_verified_at: Some(now),
        last_used_at: Some(now),
        verification_count: 1,
        decay_history: Vec::new(),
    }
}

/// A confirmed success: bump the count and refresh both timestamps.
pub fn record_verification(provenance: &ProvenanceMetadata) -> ProvenanceMetadata {
    let now = Utc::now();
    let mut updated = provenance.clone();
    updated.verification_count = updated.verification_count.saturating_add(1).max(1);
    updated.last_verified_at = Some(now);
    updated.last_used_at = Some(now);
    updated
}

/// The fact was used without a confirmed success. Only `last_used_at` moves.
pub fn record_usage(provenance: &ProvenanceMetadata) -> ProvenanceMetadata {
    let mut updated = provenance.clone();
    updated.last_used_at = Some(Utc::now());
    updated
}

/// Append a decay event (delegates to [`confidence::decay`]).
pub fn record_decay(
    provenance: &ProvenanceMetadata,
    reason: DecayReason,
    previous_confidence: f64,
    new_confidence: f64,
    details: Option<&str>,
) -> ProvenanceMetadata {
    confidence::decay(provenance, reason, previous_confidence, new_confidence, details)
}

/// Fractional days since the last verification, or `f64::INFINITY` when the
/// record was never verified.
pub fn days_since_verification(provenance: &ProvenanceMetadata, now: DateTime<Utc>) -> f64 {
    match provenance.last_verified_at {
        Some(verified) => {
            let secs = (now - verified).num_seconds().max(0) as f64;
            secs / 86_400.0
        }
        None => f64::INFINITY,
    }
}

/// Stale when never verified or verified more than `stale_days` ago.
pub fn is_stale(provenance: &ProvenanceMetadata, stale_days: u32, now: DateTime<Utc>) -> bool {
    days_since_verification(provenance, now) > f64::from(stale_days)
}
