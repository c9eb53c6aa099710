//! The tier orchestrator: picks a tier order for a URL, runs tiers one at a
//! time under a latency budget, validates what comes back, and feeds every
//! outcome into the knowledge base.
//!
//! One call walks an explicit state machine:
//!
//! ```text
//! Init -> TierSelection -> Executing(t) -> Validating(t) -> Success
//!                              ^                |
//!                              +-- next tier <--+--> Exhausted
//! ```
//!
//! Tiers never run in parallel within a call: a more expensive tier only runs
//! once every cheaper candidate in the plan has failed.

pub mod batch;
pub mod options;
pub mod preview;

pub use batch::{BatchItem, BatchResult};
pub use options::{AcquireOptions, AcquireResponse, AcquiredContent, ContentFormat};
pub use preview::BrowsePreview;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::confidence::{self, FieldConfidence};
use crate::config::EngineConfig;
use crate::error::{AcquireFailure, FailureKind, TierFailure};
use crate::extraction::{self, ContentCandidate};
use crate::knowledge::{DomainKnowledge, KnowledgeBase, Observation, PatternPayload, Quirk};
use crate::provenance::ProvenanceSource;
use crate::retry::with_retry_using;
use crate::tier::{TierExecutor, TierRequest, TierResult};
use crate::trace::{DecisionTraceBuilder, FailureClass, TierAttempt};
use crate::types::{domain_of, Tier};
use crate::validation::{self, ValidationDetails};

/// Weights for the content and title confidences in the overall score.
const FIELD_WEIGHTS: [f64; 2] = [0.7, 0.3];

pub struct TierOrchestrator {
    knowledge: Arc<KnowledgeBase>,
    executors: BTreeMap<Tier, Arc<dyn TierExecutor>>,
    config: EngineConfig,
}

enum State {
    Init,
    TierSelection,
    Executing(Tier),
    Validating {
        tier: Tier,
        result: TierResult,
        request: TierRequest,
        duration_ms: u64,
        calls: u32,
    },
    Success(Box<AcquiredContent>),
    Exhausted,
    Rejected(AcquireFailure),
}

/// Mutable context of one `acquire` call.
struct Run<'a> {
    url: &'a str,
    options: &'a AcquireOptions,
    domain: String,
    started: Instant,
    deadline: Instant,
    plan: VecDeque<Tier>,
    record: Option<DomainKnowledge>,
    quirks: Vec<Quirk>,
    trace: DecisionTraceBuilder,
    observations: Vec<Observation>,
    tiers_attempted: Vec<Tier>,
}

/// Tier order for a call: the preferred tier first when it is within the cap,
/// then every other permitted tier from cheapest to most expensive.
pub fn plan_tier_order(preferred: Option<Tier>, max_cost_tier: Tier) -> Vec<Tier> {
    let mut order = Vec::with_capacity(Tier::ALL.len());
    if let Some(tier) = preferred.filter(|t| *t <= max_cost_tier) {
        order.push(tier);
    }
    for tier in Tier::up_to(max_cost_tier) {
        if !order.contains(&tier) {
            order.push(tier);
        }
    }
    order
}

fn failure_class(failure: &TierFailure) -> FailureClass {
    match failure.kind {
        FailureKind::Timeout => FailureClass::Timeout,
        FailureKind::Validation => FailureClass::Validation,
        _ if failure.retryable() => FailureClass::Transient,
        _ => FailureClass::Permanent,
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

impl TierOrchestrator {
    pub fn new(knowledge: Arc<KnowledgeBase>, config: EngineConfig) -> Self {
        Self {
            knowledge,
            executors: BTreeMap::new(),
            config,
        }
    }

    /// Register the executor for its tier, replacing any previous one.
    pub fn with_executor(mut self, executor: Arc<dyn TierExecutor>) -> Self {
        self.register(executor);
        self
    }

    pub fn register(&mut self, executor: Arc<dyn TierExecutor>) {
        self.executors.insert(executor.tier(), executor);
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The learned tier to try first, if a pattern serving `url` is strong
    /// and fresh enough.
    fn preferred_tier(&self, record: Option<&DomainKnowledge>, url: &str) -> Option<Tier> {
        let pattern = record?.best_pattern_for(url, None)?;
        let threshold = self.knowledge.config().high_confidence_threshold;
        (pattern.confidence >= threshold && !self.knowledge.is_stale(pattern)).then_some(pattern.tier)
    }

    /// Load the domain record, treating storage failure as "nothing learned".
    async fn load_record(&self, domain: &str) -> Option<DomainKnowledge> {
        match self.knowledge.snapshot(domain).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(domain, "knowledge unavailable, proceeding without learned patterns: {e}");
                None
            }
        }
    }

    fn validate_url(url: &str) -> Result<String, AcquireFailure> {
        let parsed = url::Url::parse(url).map_err(|e| AcquireFailure::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AcquireFailure::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        domain_of(url).ok_or_else(|| AcquireFailure::InvalidUrl {
            url: url.to_string(),
            reason: "url has no host".to_string(),
        })
    }

    /// Acquire content for `url`. Failure is data: the response always
    /// carries the decision trace.
    pub async fn acquire(&self, url: &str, options: &AcquireOptions) -> AcquireResponse {
        let started = Instant::now();
        let max_latency = options
            .max_latency_ms
            .unwrap_or(self.config.default_max_latency_ms);
        let mut run = Run {
            url,
            options,
            domain: String::new(),
            started,
            deadline: started + Duration::from_millis(max_latency),
            plan: VecDeque::new(),
            record: None,
            quirks: Vec::new(),
            trace: DecisionTraceBuilder::new(),
            observations: Vec::new(),
            tiers_attempted: Vec::new(),
        };

        let mut state = State::Init;
        let outcome = loop {
            state = match state {
                State::Init => match Self::validate_url(url) {
                    Ok(domain) => {
                        run.domain = domain;
                        State::TierSelection
                    }
                    Err(failure) => State::Rejected(failure),
                },
                State::TierSelection => self.select_tiers(&mut run).await,
                State::Executing(tier) => self.execute_tier(&mut run, tier).await,
                State::Validating {
                    tier,
                    result,
                    request,
                    duration_ms,
                    calls,
                } => self.validate(&mut run, tier, result, &request, duration_ms, calls),
                State::Success(content) => break Ok(*content),
                State::Exhausted => {
                    let reason = run
                        .trace
                        .last_failure()
                        .unwrap_or("no tier executor available within the cost cap")
                        .to_string();
                    tracing::warn!(url, "all tiers failed: {reason}");
                    break Err(AcquireFailure::Exhausted {
                        attempted: run.trace.tiers_attempted(),
                        max_cost_tier: options.max_cost_tier,
                        reason,
                    });
                }
                State::Rejected(failure) => {
                    tracing::debug!(url, "rejected: {failure}");
                    return AcquireResponse {
                        result: Err(failure),
                        trace: run.trace.build(),
                    };
                }
            };
        };

        if let Err(e) = self.knowledge.learn(&run.domain, &run.observations).await {
            tracing::warn!(domain = %run.domain, "failed to record observations: {e}");
        }

        AcquireResponse {
            result: outcome,
            trace: run.trace.build(),
        }
    }

    async fn select_tiers(&self, run: &mut Run<'_>) -> State {
        run.record = self.load_record(&run.domain).await;
        run.quirks = run
            .record
            .as_ref()
            .map(|r| r.quirks().cloned().collect())
            .unwrap_or_default();

        let preferred = self.preferred_tier(run.record.as_ref(), run.url);
        let order = plan_tier_order(preferred, run.options.max_cost_tier);
        for tier in order {
            if self.executors.contains_key(&tier) {
                run.plan.push_back(tier);
            } else {
                tracing::debug!(%tier, "no executor registered, skipping");
            }
        }
        tracing::debug!(
            domain = %run.domain,
            preferred = ?preferred,
            plan = ?run.plan,
            "tier plan"
        );
        Self::next_tier(run)
    }

    fn next_tier(run: &mut Run<'_>) -> State {
        match run.plan.pop_front() {
            Some(tier) => State::Executing(tier),
            None => State::Exhausted,
        }
    }

    /// Record a failed tier and move on.
    fn fail_tier(
        &self,
        run: &mut Run<'_>,
        mut attempt: TierAttempt,
        failure: &TierFailure,
    ) -> State {
        tracing::info!(
            tier = %attempt.tier,
            url = run.url,
            "tier failed ({}): {}",
            failure.kind,
            failure.reason
        );
        attempt.failure_reason = Some(failure.reason.clone());
        let tier = attempt.tier;
        let duration_ms = attempt.duration_ms;
        run.trace.record_tier(attempt);

        run.observations.push(
            Observation::failure(tier, failure.kind, failure.reason.clone())
                .with_source_url(run.url)
                .with_duration(duration_ms),
        );
        if let Some(quirk) = Quirk::from_failure(failure.kind, failure.retry_after_secs) {
            run.observations.push(
                Observation::success(tier, PatternPayload::Quirk { quirk })
                    .with_source(ProvenanceSource::BackendFingerprinting, Some(run.url.to_string())),
            );
        }
        Self::next_tier(run)
    }

    async fn execute_tier(&self, run: &mut Run<'_>, tier: Tier) -> State {
        let Some(executor) = self.executors.get(&tier).cloned() else {
            return Self::next_tier(run);
        };
        run.tiers_attempted.push(tier);

        let now = Instant::now();
        let remaining = run.deadline.saturating_duration_since(now);
        if remaining.is_zero() {
            let failure = TierFailure::timeout("latency budget exhausted before tier started");
            let attempt = TierAttempt::failed(tier, 0, FailureClass::Timeout, failure.reason.clone());
            run.trace.record_tier(attempt);
            run.plan.clear();
            return State::Exhausted;
        }

        let tiers_left = run.plan.len() as u32 + 1;
        let min_budget = Duration::from_millis(self.config.min_tier_budget_ms);
        let budget = (remaining / tiers_left).max(min_budget).min(remaining);

        let request = TierRequest {
            url: run.url.to_string(),
            domain: run.domain.clone(),
            budget,
            pattern: run
                .record
                .as_ref()
                .and_then(|r| r.best_pattern_for(run.url, Some(tier)))
                .cloned(),
            quirks: run.quirks.clone(),
        };

        tracing::debug!(%tier, url = run.url, budget_ms = budget.as_millis() as u64, "executing tier");
        let mut retries = 0u32;
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            budget,
            with_retry_using(
                &self.config.retry,
                || executor.execute(&request),
                |e: &TierFailure| e.retryable(),
                |attempt, e, delay| {
                    retries += 1;
                    tracing::debug!(%tier, attempt, "retrying after {:?}: {e}", delay);
                },
            ),
        )
        .await;
        let duration_ms = elapsed_ms(started);
        let calls = retries + 1;

        match outcome {
            Ok(Ok(result)) => State::Validating {
                tier,
                result,
                request,
                duration_ms,
                calls,
            },
            Ok(Err(failure)) => {
                let mut attempt = TierAttempt::failed(tier, duration_ms, failure_class(&failure), "");
                attempt.calls = calls;
                self.fail_tier(run, attempt, &failure)
            }
            Err(_) => {
                let failure = TierFailure::timeout(format!(
                    "tier exceeded its {} ms budget",
                    budget.as_millis()
                ));
                let mut attempt = TierAttempt::failed(tier, duration_ms, FailureClass::Timeout, "");
                attempt.calls = calls;
                self.fail_tier(run, attempt, &failure)
            }
        }
    }

    fn validate(
        &self,
        run: &mut Run<'_>,
        tier: Tier,
        result: TierResult,
        request: &TierRequest,
        duration_ms: u64,
        calls: u32,
    ) -> State {
        let policy = &self.config.validation;
        let verify_opts = &run.options.verify;
        let floor = if verify_opts.enabled {
            policy.min_content_length
        } else {
            1
        };

        let selection = extraction::select_content(tier, &result.content_candidates, floor);
        run.trace.record_selectors(selection.attempts.iter().cloned());

        let mut attempt = TierAttempt::failed(tier, duration_ms, FailureClass::Validation, "");
        attempt.calls = calls;
        attempt.proxied = result.proxied;

        let Some(selected) = selection.selected.clone() else {
            let best = selection.best_length();
            let reason = if result.content_candidates.is_empty() {
                "tier returned no content candidates".to_string()
            } else {
                format!("insufficient content: {best} chars (minimum {floor})")
            };
            attempt.validation_details = Some(ValidationDetails {
                content_length: best,
                has_semantic_markers: false,
                markers: Vec::new(),
            });
            return self.fail_tier(run, attempt, &TierFailure::new(FailureKind::Validation, reason));
        };

        let content = selected.content.clone().unwrap_or_default();
        let (verification, details) = validation::verify(&content, policy, verify_opts);
        attempt.validation_details = Some(details);
        attempt.extraction_strategy = Some(format!("{}:{}", selected.source, selected.selector));
        if !verification.passed {
            let reason = verification.errors.join("; ");
            return self.fail_tier(run, attempt, &TierFailure::new(FailureKind::Validation, reason));
        }

        let titles = extraction::select_title(tier, &result.title_candidates, policy.min_title_length);
        run.trace.record_titles(titles.attempts.iter().cloned());

        attempt.success = true;
        attempt.failure_class = None;
        attempt.failure_reason = None;
        run.trace.record_tier(attempt.clone());

        let boost_amount = self.knowledge.config().boost_amount;
        let content_confidence = confidence::boost(
            &confidence::from_source(
                selected.source,
                Some(format!("content from {}", selected.selector).as_str()),
            ),
            true,
            boost_amount,
        );
        let title_confidence = titles
            .selected
            .as_ref()
            .map(|t| confidence::from_source(t.source, Some(format!("title from {}", t.label).as_str())));
        let overall = match &title_confidence {
            Some(title) => confidence::aggregate(
                &[content_confidence.clone(), title.clone()],
                Some(&FIELD_WEIGHTS[..]),
            ),
            None => confidence::aggregate(std::slice::from_ref(&content_confidence), None),
        };

        self.record_success(
            run,
            tier,
            &selected,
            titles.selected.as_ref().map(|t| t.label.clone()),
            request,
            &result,
            &content_confidence,
            duration_ms,
        );

        let content = match run.options.content_type {
            ContentFormat::Markdown => content,
            ContentFormat::Text => extraction::text::markdown_to_text(&content),
        };
        let (content, truncated) = match run.options.max_chars {
            Some(max) if content.chars().count() > max => {
                (extraction::truncate_chars(&content, max).to_string(), true)
            }
            _ => (content, false),
        };

        tracing::info!(
            %tier,
            url = run.url,
            chars = content.len(),
            confidence = overall.score,
            "acquired"
        );

        State::Success(Box::new(AcquiredContent {
            url: run.url.to_string(),
            final_url: result.final_url.clone().unwrap_or_else(|| run.url.to_string()),
            domain: run.domain.clone(),
            tier,
            content,
            content_type: run.options.content_type,
            title: titles.selected.and_then(|t| t.value),
            truncated,
            extraction_strategy: attempt.extraction_strategy.unwrap_or_default(),
            content_confidence,
            title_confidence,
            confidence: overall,
            verification,
            tiers_attempted: run.tiers_attempted.clone(),
            discovered_apis: result.discovered_apis,
            proxied: result.proxied,
            load_time_ms: elapsed_ms(run.started),
        }))
    }

    /// Queue the observations a successful tier produces.
    #[allow(clippy::too_many_arguments)]
    fn record_success(
        &self,
        run: &mut Run<'_>,
        tier: Tier,
        selected: &ContentCandidate,
        title_source: Option<String>,
        request: &TierRequest,
        result: &TierResult,
        content_confidence: &FieldConfidence,
        duration_ms: u64,
    ) {
        let used_api = request
            .pattern
            .as_ref()
            .filter(|p| matches!(p.payload, PatternPayload::Api { .. }))
            .filter(|_| tier == Tier::Intelligence);

        let (payload, source) = match used_api {
            Some(pattern) => (pattern.payload.clone(), ProvenanceSource::ApiExtraction),
            None => (
                PatternPayload::Selector {
                    selector: selected.selector.clone(),
                    title_source,
                },
                ProvenanceSource::LinkDiscovery,
            ),
        };

        run.observations.push(
            Observation::success(tier, payload)
                .with_confidence(content_confidence.score)
                .with_source(source, Some(run.url.to_string()))
                .with_duration(duration_ms),
        );

        for api in &result.discovered_apis {
            run.observations.push(
                Observation::success(
                    Tier::Intelligence,
                    PatternPayload::Api {
                        endpoint: api.url.clone(),
                        method: api.method.clone(),
                        content_type: api.content_type.clone(),
                    },
                )
                .with_source(ProvenanceSource::ApiExtraction, Some(run.url.to_string())),
            );
        }
    }
}
