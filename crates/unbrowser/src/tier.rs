//! Collaborator contracts for tier executors and proxy providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::TierFailure;
use crate::extraction::{ContentCandidate, TitleCandidate};
use crate::knowledge::{Pattern, Quirk};
use crate::types::Tier;

/// Everything an executor needs for one call.
#[derive(Debug, Clone)]
pub struct TierRequest {
    pub url: String,
    pub domain: String,
    /// Wall-clock budget for this tier, including retries.
    pub budget: Duration,
    /// The strongest learned pattern this tier owns for the domain, if any.
    pub pattern: Option<Pattern>,
    /// Known site behaviours (rate limits, bot walls) as hints.
    pub quirks: Vec<Quirk>,
}

/// A backend endpoint the tier noticed while fetching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredApi {
    pub url: String,
    pub method: String,
    pub content_type: Option<String>,
}

/// Raw output of a tier: candidates, not a decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierResult {
    pub final_url: Option<String>,
    pub status: Option<u16>,
    pub content_candidates: Vec<ContentCandidate>,
    pub title_candidates: Vec<TitleCandidate>,
    pub discovered_apis: Vec<DiscoveredApi>,
    /// Whether the request went out through a proxy.
    pub proxied: bool,
}

/// One acquisition strategy.
///
/// Executors classify their own failures; the orchestrator only retries
/// those for which [`TierFailure::retryable`] is true. Dropping the future
/// returned by `execute` must abort any in-flight I/O.
#[async_trait]
pub trait TierExecutor: Send + Sync {
    fn tier(&self) -> Tier;

    async fn execute(&self, request: &TierRequest) -> Result<TierResult, TierFailure>;
}

/// An egress endpoint handed out by a [`ProxyProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub url: String,
    pub session_id: Option<String>,
}

/// Supplies rotating egress endpoints to tiers that can use them.
pub trait ProxyProvider: Send + Sync {
    /// The next endpoint for `domain`, or `None` to go direct.
    fn next_endpoint(&self, domain: &str) -> Option<ProxyEndpoint>;

    /// Report that an endpoint was blocked or failed for `domain`.
    fn report_failure(&self, _endpoint: &ProxyEndpoint, _domain: &str) {}
}
