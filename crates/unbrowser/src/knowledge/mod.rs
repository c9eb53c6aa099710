//! Durable, per-domain knowledge of what works.
//!
//! Each domain is one [`DomainKnowledge`] record in the `patterns` namespace
//! of a [`PersistenceStore`]. Reads are lock-free; writes for a domain are
//! serialized by a per-domain async mutex, so concurrent `learn` calls for
//! different domains never contend and calls for the same domain never
//! interleave their read-modify-write.
//!
//! Staleness is handled lazily: a read that finds a stale pattern applies one
//! `time_decay` step per staleness period and persists it.

mod pattern;

pub use pattern::{
    DomainIntelligence, DomainKnowledge, FailureRecord, Observation, Outcome, Pattern,
    PatternKind, PatternPayload, Quirk, TierStats,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::confidence::{self, ExtractionSource, FieldConfidence};
use crate::config::KnowledgeConfig;
use crate::error::{FailureKind, StorageError};
use crate::provenance::{self, DecayReason, ProvenanceOptions, ProvenanceSource};
use crate::store::{MemoryStore, PersistenceStore};
use crate::types::{domain_of, Tier};

/// Store namespace holding one record per domain.
pub const PATTERNS_NAMESPACE: &str = "patterns";

/// Archived patterns kept per domain.
const MAX_ARCHIVED: usize = 50;

pub struct KnowledgeBase {
    store: Arc<dyn PersistenceStore>,
    config: KnowledgeConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KnowledgeBase {
    pub fn new(store: Arc<dyn PersistenceStore>, config: KnowledgeConfig) -> Self {
        Self {
            store,
            config,
            locks: DashMap::new(),
        }
    }

    /// A knowledge base that forgets everything when dropped.
    pub fn in_memory(config: KnowledgeConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PersistenceStore> {
        &self.store
    }

    fn lock_for(&self, domain: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load(&self, domain: &str) -> Result<Option<DomainKnowledge>, StorageError> {
        match self.store.get(PATTERNS_NAMESPACE, domain).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StorageError::Corrupt {
                    namespace: PATTERNS_NAMESPACE.to_string(),
                    key: domain.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &mut DomainKnowledge) -> Result<(), StorageError> {
        record.version += 1;
        record.updated_at = Utc::now();
        let value = serde_json::to_value(&*record)?;
        self.store
            .set(PATTERNS_NAMESPACE, &record.domain, value)
            .await
    }

    /// The current record for `domain`, with any due time decay applied.
    pub async fn snapshot(&self, domain: &str) -> Result<Option<DomainKnowledge>, StorageError> {
        let now = Utc::now();
        let Some(record) = self.load(domain).await? else {
            return Ok(None);
        };
        if !record.patterns.iter().any(|p| self.needs_time_decay(p, now)) {
            return Ok(Some(record));
        }

        let lock = self.lock_for(domain);
        let _guard = lock.lock().await;
        let Some(mut record) = self.load(domain).await? else {
            return Ok(None);
        };
        if self.apply_time_decay(&mut record, now) {
            self.save(&mut record).await?;
        }
        Ok(Some(record))
    }

    /// Highest-confidence active pattern that serves `url`.
    pub async fn find_pattern(&self, url: &str) -> Result<Option<Pattern>, StorageError> {
        let Some(domain) = domain_of(url) else {
            return Ok(None);
        };
        Ok(self
            .snapshot(&domain)
            .await?
            .and_then(|record| record.best_pattern_for(url, None).cloned()))
    }

    /// Highest-confidence active pattern owned by `tier`.
    pub async fn find_pattern_for_tier(
        &self,
        domain: &str,
        tier: Tier,
    ) -> Result<Option<Pattern>, StorageError> {
        Ok(self
            .snapshot(domain)
            .await?
            .and_then(|record| record.best_pattern(Some(tier)).cloned()))
    }

    /// Active quirks for `domain`.
    pub async fn quirks(&self, domain: &str) -> Result<Vec<Quirk>, StorageError> {
        Ok(self
            .snapshot(domain)
            .await?
            .map(|record| record.quirks().cloned().collect())
            .unwrap_or_default())
    }

    /// Stale when never verified or not verified within `stale_days`.
    pub fn is_stale(&self, pattern: &Pattern) -> bool {
        provenance::is_stale(&pattern.provenance, self.config.stale_days, Utc::now())
    }

    /// Every domain with a record.
    pub async fn domains(&self) -> Result<Vec<String>, StorageError> {
        self.store.keys(PATTERNS_NAMESPACE).await
    }

    /// Fold observations for `domain` into its record and persist it.
    ///
    /// The whole batch is one store write: either every observation is
    /// recorded or none is.
    pub async fn learn(&self, domain: &str, observations: &[Observation]) -> Result<(), StorageError> {
        if observations.is_empty() {
            return Ok(());
        }

        let lock = self.lock_for(domain);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let mut record = self
            .load(domain)
            .await?
            .unwrap_or_else(|| DomainKnowledge::new(domain));
        self.apply_time_decay(&mut record, now);

        for obs in observations {
            if let Some(duration_ms) = obs.duration_ms {
                let stats = record.tier_stats.entry(obs.tier).or_default();
                stats.attempts += 1;
                stats.total_duration_ms += duration_ms;
                if obs.is_success() {
                    stats.successes += 1;
                }
            }

            match &obs.outcome {
                Outcome::Success => {
                    if let Some(payload) = &obs.payload {
                        self.upsert_success(&mut record, obs, payload.clone());
                    }
                }
                Outcome::Failure { kind, reason } => {
                    record.recent_failures.insert(
                        0,
                        FailureRecord {
                            at: now,
                            tier: obs.tier,
                            kind: *kind,
                            reason: reason.clone(),
                        },
                    );
                    record.recent_failures.truncate(self.config.max_recent_failures);

                    let target = obs.payload.as_ref().map(|p| p.logical_key(obs.tier));
                    for pattern in record.patterns.iter_mut() {
                        let applies = match &target {
                            Some(key) => &pattern.key == key,
                            None => {
                                pattern.tier == obs.tier
                                    && pattern.kind() != PatternKind::Quirk
                                    && obs.source_url.as_deref().map_or(true, |u| pattern.applies_to(u))
                            }
                        };
                        if applies {
                            self.apply_failure(pattern, *kind, reason);
                        }
                    }
                }
            }
        }

        self.archive_weak(&mut record);
        self.save(&mut record).await?;
        tracing::debug!(
            domain,
            version = record.version,
            patterns = record.patterns.len(),
            "knowledge updated"
        );
        Ok(())
    }

    /// Lower a pattern's confidence by hand. Returns `false` when no active
    /// pattern has `key` or `new_confidence` is not lower.
    pub async fn manual_downgrade(
        &self,
        domain: &str,
        key: &str,
        new_confidence: f64,
        details: Option<&str>,
    ) -> Result<bool, StorageError> {
        let lock = self.lock_for(domain);
        let _guard = lock.lock().await;

        let Some(mut record) = self.load(domain).await? else {
            return Ok(false);
        };
        let new_confidence = confidence::clamp_score(new_confidence);
        let Some(pattern) = record.patterns.iter_mut().find(|p| p.key == key) else {
            return Ok(false);
        };
        if new_confidence >= pattern.confidence {
            return Ok(false);
        }

        pattern.provenance = provenance::record_decay(
            &pattern.provenance,
            DecayReason::ManualDowngrade,
            pattern.confidence,
            new_confidence,
            details,
        );
        pattern.confidence = new_confidence;
        self.archive_weak(&mut record);
        self.save(&mut record).await?;
        tracing::info!(domain, key, new_confidence, "pattern manually downgraded");
        Ok(true)
    }

    /// Apply user feedback on a pattern. Positive feedback on an unknown
    /// pattern creates it with `user_feedback` provenance.
    pub async fn record_feedback(
        &self,
        domain: &str,
        tier: Tier,
        payload: PatternPayload,
        positive: bool,
    ) -> Result<(), StorageError> {
        let lock = self.lock_for(domain);
        let _guard = lock.lock().await;

        let mut record = self
            .load(domain)
            .await?
            .unwrap_or_else(|| DomainKnowledge::new(domain));
        let key = payload.logical_key(tier);

        match record.patterns.iter_mut().find(|p| p.key == key) {
            Some(pattern) => {
                pattern.confidence = self.boosted(pattern.confidence, positive);
                pattern.provenance = if positive {
                    provenance::record_verification(&pattern.provenance)
                } else {
                    provenance::record_usage(&pattern.provenance)
                };
            }
            None if positive => {
                let pattern = self.new_pattern(
                    domain,
                    tier,
                    key,
                    payload,
                    self.config.initial_confidence,
                    ProvenanceSource::UserFeedback,
                    None,
                );
                record.patterns.push(pattern);
            }
            None => return Ok(()),
        }

        self.archive_weak(&mut record);
        self.save(&mut record).await
    }

    /// Summary of what is known about `domain`.
    pub async fn domain_intelligence(&self, domain: &str) -> Result<DomainIntelligence, StorageError> {
        let record = self
            .snapshot(domain)
            .await?
            .unwrap_or_else(|| DomainKnowledge::new(domain));

        let count = |kind: PatternKind| record.patterns.iter().filter(|p| p.kind() == kind).count();
        let quirks: Vec<Quirk> = record.quirks().cloned().collect();
        let best = record.best_pattern(None);
        let has_activity = record.version > 0;

        let recommended_tier = match best {
            Some(p) if p.confidence >= self.config.high_confidence_threshold && !self.is_stale(p) => {
                p.tier
            }
            _ if quirks.contains(&Quirk::RequiresJavascript) => Tier::Playwright,
            _ if count(PatternKind::Api) > 0 => Tier::Intelligence,
            _ => Tier::Lightweight,
        };

        Ok(DomainIntelligence {
            domain: record.domain.clone(),
            known_patterns: record.patterns.len(),
            selector_patterns: count(PatternKind::Selector),
            api_patterns: count(PatternKind::Api),
            archived_patterns: record.archived.len(),
            should_use_session: quirks.contains(&Quirk::AuthRequired),
            quirks,
            recent_failures: record.recent_failures.len(),
            success_rate: record.overall_success_rate(),
            preferred_tier: best.map(|p| p.tier),
            recommended_tier,
            last_activity: has_activity.then_some(record.updated_at),
        })
    }

    fn boosted(&self, score: f64, passed: bool) -> f64 {
        let current = FieldConfidence::new(score, ExtractionSource::LearnedPattern, None);
        confidence::boost(&current, passed, self.config.boost_amount).score
    }

    #[allow(clippy::too_many_arguments)]
    fn new_pattern(
        &self,
        domain: &str,
        tier: Tier,
        key: String,
        payload: PatternPayload,
        confidence: f64,
        source: ProvenanceSource,
        source_url: Option<String>,
    ) -> Pattern {
        Pattern {
            id: Uuid::new_v4(),
            domain: domain.to_string(),
            tier,
            key,
            payload,
            confidence: confidence::clamp_score(confidence),
            provenance: provenance::create(
                source,
                ProvenanceOptions {
                    source_url,
                    source_domain: Some(domain.to_string()),
                    source_pattern_id: None,
                },
            ),
            failure_streak: 0,
            success_count: 1,
            failure_count: 0,
        }
    }

    fn upsert_success(&self, record: &mut DomainKnowledge, obs: &Observation, payload: PatternPayload) {
        let key = payload.logical_key(obs.tier);

        if let Some(pattern) = record.patterns.iter_mut().find(|p| p.key == key) {
            pattern.confidence = self.boosted(pattern.confidence, true);
            pattern.provenance = provenance::record_verification(&pattern.provenance);
            pattern.failure_streak = 0;
            pattern.success_count += 1;
            pattern.payload = payload;
            return;
        }

        if let Some(idx) = record.archived.iter().position(|p| p.key == key) {
            let mut pattern = record.archived.remove(idx);
            let start = obs.confidence.unwrap_or(self.config.initial_confidence);
            pattern.confidence = confidence::clamp_score(start);
            pattern.provenance = provenance::record_verification(&pattern.provenance);
            pattern.failure_streak = 0;
            pattern.success_count += 1;
            pattern.payload = payload;
            tracing::info!(domain = %record.domain, key = %pattern.key, "archived pattern reactivated");
            record.patterns.push(pattern);
            return;
        }

        let pattern = self.new_pattern(
            &record.domain,
            obs.tier,
            key,
            payload,
            obs.confidence.unwrap_or(self.config.initial_confidence),
            obs.source,
            obs.source_url.clone(),
        );
        tracing::info!(
            domain = %record.domain,
            key = %pattern.key,
            confidence = pattern.confidence,
            "learned new pattern"
        );
        record.patterns.push(pattern);
    }

    fn apply_failure(&self, pattern: &mut Pattern, kind: FailureKind, reason: &str) {
        let previous = pattern.confidence;
        let mut updated = self.boosted(previous, false);
        pattern.provenance = provenance::record_usage(&pattern.provenance);
        pattern.failure_streak += 1;
        pattern.failure_count += 1;

        // The streak only resets on success; every multiple of the threshold decays again.
        let threshold = self.config.failure_streak_threshold.max(1);
        if pattern.failure_streak % threshold == 0 {
            let decayed = confidence::clamp_score(updated * self.config.repeated_failure_decay_factor);
            let decay_reason = match kind {
                FailureKind::Validation => DecayReason::ValidationFailures,
                FailureKind::RateLimited => DecayReason::RateLimited,
                FailureKind::AuthRequired => DecayReason::AuthExpired,
                _ => DecayReason::RepeatedFailures,
            };
            let details = format!("{} consecutive failures; last: {reason}", pattern.failure_streak);
            pattern.provenance = provenance::record_decay(
                &pattern.provenance,
                decay_reason,
                previous,
                decayed,
                Some(&details),
            );
            tracing::warn!(
                domain = %pattern.domain,
                key = %pattern.key,
                "pattern decayed ({decay_reason}): {previous:.3} -> {decayed:.3}"
            );
            updated = decayed;
        }
        pattern.confidence = updated;
    }

    fn needs_time_decay(&self, pattern: &Pattern, now: DateTime<Utc>) -> bool {
        if !provenance::is_stale(&pattern.provenance, self.config.stale_days, now) {
            return false;
        }
        let period = chrono::Duration::days(i64::from(self.config.stale_days));
        !pattern
            .provenance
            .decay_history
            .iter()
            .any(|e| e.reason == DecayReason::TimeDecay && now - e.timestamp <= period)
    }

    /// Returns whether anything changed.
    fn apply_time_decay(&self, record: &mut DomainKnowledge, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        for pattern in record.patterns.iter_mut() {
            if !self.needs_time_decay(pattern, now) {
                continue;
            }
            let previous = pattern.confidence;
            let decayed = confidence::clamp_score(previous * self.config.time_decay_factor);
            let days = provenance::days_since_verification(&pattern.provenance, now);
            let details = if days.is_finite() {
                format!("not verified for {days:.1} days")
            } else {
                "never verified".to_string()
            };
            pattern.provenance = provenance::record_decay(
                &pattern.provenance,
                DecayReason::TimeDecay,
                previous,
                decayed,
                Some(&details),
            );
            pattern.confidence = decayed;
            changed = true;
        }
        if changed {
            tracing::debug!(domain = %record.domain, "applied time decay");
            self.archive_weak(record);
        }
        changed
    }

    fn archive_weak(&self, record: &mut DomainKnowledge) {
        let threshold = self.config.archive_threshold;
        let (keep, weak): (Vec<Pattern>, Vec<Pattern>) = std::mem::take(&mut record.patterns)
            .into_iter()
            .partition(|p| p.confidence >= threshold);
        record.patterns = keep;

        for mut pattern in weak {
            pattern.provenance = provenance::record_decay(
                &pattern.provenance,
                DecayReason::PatternArchived,
                pattern.confidence,
                pattern.confidence,
                Some("confidence below archive threshold"),
            );
            tracing::info!(domain = %record.domain, key = %pattern.key, "pattern archived");
            record.archived.retain(|p| p.key != pattern.key);
            record.archived.insert(0, pattern);
        }
        record.archived.truncate(MAX_ARCHIVED);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::DecayEvent;
    use async_trait::async_trait;
    use serde_json::Value;

    fn kb() -> KnowledgeBase {
        KnowledgeBase::in_memory(KnowledgeConfig::default())
    }

    fn article() -> PatternPayload {
        PatternPayload::Selector {
            selector: "article".into(),
            title_source: Some("og:title".into()),
        }
    }

    fn success(tier: Tier, confidence: f64) -> Observation {
        Observation::success(tier, article())
            .with_confidence(confidence)
            .with_duration(100)
    }

    #[tokio::test]
    async fn test_find_pattern_unknown_domain_is_none() {
        let kb = kb();
        assert!(kb.find_pattern("https://nowhere.test/x").await.unwrap().is_none());
        assert!(kb.find_pattern("not a url").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_learn_creates_then_boosts_single_pattern() {
        let kb = kb();
        kb.learn("example.com", &[success(Tier::Lightweight, 0.85)]).await.unwrap();

        let pattern = kb.find_pattern("https://www.example.com/a").await.unwrap().unwrap();
        assert_eq!(pattern.tier, Tier::Lightweight);
        assert!((pattern.confidence - 0.85).abs() < 1e-9);
        assert_eq!(pattern.provenance.verification_count, 1);

        kb.learn("example.com", &[success(Tier::Lightweight, 0.85)]).await.unwrap();
        let record = kb.snapshot("example.com").await.unwrap().unwrap();
        assert_eq!(record.patterns.len(), 1, "same logical key must not duplicate");
        assert!((record.patterns[0].confidence - 0.95).abs() < 1e-9);
        assert_eq!(record.patterns[0].provenance.verification_count, 2);
        assert_eq!(record.version, 2);
        assert_eq!(record.tier_stats[&Tier::Lightweight].attempts, 2);
    }

    #[tokio::test]
    async fn test_failure_streak_triggers_decay() {
        let kb = kb();
        kb.learn("example.com", &[success(Tier::Lightweight, 0.9)]).await.unwrap();

        for _ in 0..3 {
            kb.learn(
                "example.com",
                &[Observation::failure(Tier::Lightweight, FailureKind::ServerError, "503").with_duration(10)],
            )
            .await
            .unwrap();
        }

        let record = kb.snapshot("example.com").await.unwrap().unwrap();
        let pattern = &record.patterns[0];
        assert_eq!(pattern.failure_streak, 3);
        assert_eq!(pattern.provenance.verification_count, 1);
        // 0.9 -> 0.8 -> 0.7 -> (0.6 * 0.5)
        assert!((pattern.confidence - 0.3).abs() < 1e-9);
        let event: &DecayEvent = &pattern.provenance.decay_history[0];
        assert_eq!(event.reason, DecayReason::RepeatedFailures);
        assert!((event.previous_confidence - 0.7).abs() < 1e-9);
        assert_eq!(record.recent_failures.len(), 3);
    }

    #[tokio::test]
    async fn test_streak_decays_at_every_multiple_of_threshold() {
        let config = KnowledgeConfig {
            failure_streak_threshold: 2,
            repeated_failure_decay_factor: 0.9,
            ..KnowledgeConfig::default()
        };
        let kb = KnowledgeBase::in_memory(config);
        kb.learn("example.com", &[success(Tier::Lightweight, 0.9)]).await.unwrap();
        for _ in 0..4 {
            kb.learn(
                "example.com",
                &[Observation::failure(Tier::Lightweight, FailureKind::Network, "reset")],
            )
            .await
            .unwrap();
        }

        let pattern = kb.find_pattern("https://example.com").await.unwrap().unwrap();
        // The streak keeps counting until a success; decay fires at 2 and 4.
        assert_eq!(pattern.failure_streak, 4);
        let decays = pattern
            .provenance
            .decay_history
            .iter()
            .filter(|e| e.reason == DecayReason::RepeatedFailures)
            .count();
        assert_eq!(decays, 2);
        // 0.9 -> 0.8 -> (0.7 * 0.9) -> 0.53 -> (0.43 * 0.9)
        assert!((pattern.confidence - 0.387).abs() < 1e-9);

        kb.learn("example.com", &[success(Tier::Lightweight, 0.9)]).await.unwrap();
        let pattern = kb.find_pattern("https://example.com").await.unwrap().unwrap();
        assert_eq!(pattern.failure_streak, 0);
    }

    #[tokio::test]
    async fn test_validation_failures_decay_reason_and_configurable_threshold() {
        let config = KnowledgeConfig {
            failure_streak_threshold: 1,
            ..KnowledgeConfig::default()
        };
        let kb = KnowledgeBase::in_memory(config);
        kb.learn("example.com", &[success(Tier::Lightweight, 0.9)]).await.unwrap();
        kb.learn(
            "example.com",
            &[Observation::failure(Tier::Lightweight, FailureKind::Validation, "40 chars")],
        )
        .await
        .unwrap();

        let pattern = kb.find_pattern("https://example.com").await.unwrap().unwrap();
        assert_eq!(pattern.provenance.decay_history[0].reason, DecayReason::ValidationFailures);
        assert!((pattern.confidence - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failure_for_other_tier_leaves_pattern_alone() {
        let kb = kb();
        kb.learn("example.com", &[success(Tier::Lightweight, 0.85)]).await.unwrap();
        kb.learn(
            "example.com",
            &[Observation::failure(Tier::Intelligence, FailureKind::Validation, "too short")],
        )
        .await
        .unwrap();
        let pattern = kb.find_pattern("https://example.com").await.unwrap().unwrap();
        assert!((pattern.confidence - 0.85).abs() < 1e-9);
        assert_eq!(pattern.failure_streak, 0);
    }

    #[tokio::test]
    async fn test_weak_patterns_archived_and_reactivated() {
        let config = KnowledgeConfig {
            failure_streak_threshold: 1,
            repeated_failure_decay_factor: 0.1,
            ..KnowledgeConfig::default()
        };
        let kb = KnowledgeBase::in_memory(config);
        kb.learn("example.com", &[success(Tier::Lightweight, 0.8)]).await.unwrap();
        kb.learn(
            "example.com",
            &[Observation::failure(Tier::Lightweight, FailureKind::Blocked, "captcha")],
        )
        .await
        .unwrap();

        let record = kb.snapshot("example.com").await.unwrap().unwrap();
        assert!(record.patterns.is_empty());
        assert_eq!(record.archived.len(), 1);
        assert_eq!(
            record.archived[0].provenance.decay_history[0].reason,
            DecayReason::PatternArchived
        );
        assert!(kb.find_pattern("https://example.com").await.unwrap().is_none());

        kb.learn("example.com", &[success(Tier::Lightweight, 0.85)]).await.unwrap();
        let record = kb.snapshot("example.com").await.unwrap().unwrap();
        assert_eq!(record.patterns.len(), 1);
        assert!(record.archived.is_empty());
        assert_eq!(record.patterns[0].success_count, 2);
    }

    #[tokio::test]
    async fn test_lazy_time_decay_applies_once_per_period() {
        let kb = kb();
        kb.learn("example.com", &[success(Tier::Lightweight, 0.9)]).await.unwrap();

        // Age the record directly in the store.
        let mut value = kb.store().get(PATTERNS_NAMESPACE, "example.com").await.unwrap().unwrap();
        let mut record: DomainKnowledge = serde_json::from_value(value.clone()).unwrap();
        record.patterns[0].provenance.last_verified_at = Some(Utc::now() - chrono::Duration::days(20));
        value = serde_json::to_value(&record).unwrap();
        kb.store().set(PATTERNS_NAMESPACE, "example.com", value).await.unwrap();

        let pattern = kb.find_pattern("https://example.com").await.unwrap().unwrap();
        assert!(kb.is_stale(&pattern));
        assert!((pattern.confidence - 0.9 * 0.85).abs() < 1e-9);
        assert_eq!(pattern.provenance.decay_history[0].reason, DecayReason::TimeDecay);

        let again = kb.find_pattern("https://example.com").await.unwrap().unwrap();
        assert!((again.confidence - pattern.confidence).abs() < 1e-12);
        assert_eq!(again.provenance.decay_history.len(), 1);
    }

    #[tokio::test]
    async fn test_quirks_and_intelligence() {
        let kb = kb();
        kb.learn(
            "example.com",
            &[
                success(Tier::Lightweight, 0.85),
                Observation::success(
                    Tier::Lightweight,
                    PatternPayload::Quirk {
                        quirk: Quirk::AuthRequired,
                    },
                ),
                Observation::failure(Tier::Playwright, FailureKind::Unsupported, "no browser")
                    .with_duration(1),
            ],
        )
        .await
        .unwrap();

        assert_eq!(kb.quirks("example.com").await.unwrap(), vec![Quirk::AuthRequired]);
        let intel = kb.domain_intelligence("example.com").await.unwrap();
        assert_eq!(intel.known_patterns, 2);
        assert_eq!(intel.selector_patterns, 1);
        assert!(intel.should_use_session);
        assert_eq!(intel.preferred_tier, Some(Tier::Lightweight));
        assert_eq!(intel.recommended_tier, Tier::Lightweight);
        assert_eq!(intel.recent_failures, 1);
        assert!((intel.success_rate - 0.5).abs() < 1e-9);
        assert!(intel.last_activity.is_some());

        let empty = kb.domain_intelligence("unknown.test").await.unwrap();
        assert_eq!(empty.known_patterns, 0);
        assert_eq!(empty.last_activity, None);
    }

    #[tokio::test]
    async fn test_manual_downgrade_and_feedback() {
        let kb = kb();
        kb.learn("example.com", &[success(Tier::Lightweight, 0.85)]).await.unwrap();
        let key = article().logical_key(Tier::Lightweight);

        assert!(!kb.manual_downgrade("example.com", &key, 0.95, None).await.unwrap());
        assert!(kb
            .manual_downgrade("example.com", &key, 0.5, Some("layout changed"))
            .await
            .unwrap());
        let pattern = kb.find_pattern("https://example.com").await.unwrap().unwrap();
        assert_eq!(pattern.confidence, 0.5);
        assert_eq!(pattern.provenance.decay_history[0].reason, DecayReason::ManualDowngrade);

        kb.record_feedback("example.com", Tier::Lightweight, article(), true)
            .await
            .unwrap();
        let pattern = kb.find_pattern("https://example.com").await.unwrap().unwrap();
        assert!((pattern.confidence - 0.6).abs() < 1e-9);

        let api = PatternPayload::Api {
            endpoint: "https://example.com/api/v1/posts".into(),
            method: "GET".into(),
            content_type: Some("application/json".into()),
        };
        kb.record_feedback("example.com", Tier::Intelligence, api, true)
            .await
            .unwrap();
        let created = kb
            .find_pattern_for_tier("example.com", Tier::Intelligence)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.provenance.source, ProvenanceSource::UserFeedback);
    }

    #[tokio::test]
    async fn test_concurrent_learns_same_domain_are_serialized() {
        let kb = Arc::new(kb());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let kb = Arc::clone(&kb);
            handles.push(tokio::spawn(async move {
                kb.learn("example.com", &[success(Tier::Lightweight, 0.5)]).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        let record = kb.snapshot("example.com").await.unwrap().unwrap();
        assert_eq!(record.version, 20);
        assert_eq!(record.patterns.len(), 1);
        assert_eq!(record.patterns[0].success_count, 20);
        assert_eq!(record.tier_stats[&Tier::Lightweight].attempts, 20);
    }

    struct BrokenStore;

    #[async_trait]
    impl PersistenceStore for BrokenStore {
        async fn get(&self, _: &str, _: &str) -> Result<Option<Value>, StorageError> {
            Err(StorageError::Unavailable("disk on fire".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Value) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disk on fire".into()))
        }
        async fn delete(&self, _: &str, _: &str) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn count(&self, _: &str) -> Result<usize, StorageError> {
            Ok(0)
        }
        async fn keys(&self, _: &str) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_storage_errors_propagate() {
        let kb = KnowledgeBase::new(Arc::new(BrokenStore), KnowledgeConfig::default());
        assert!(matches!(
            kb.find_pattern("https://example.com").await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(kb
            .learn("example.com", &[success(Tier::Lightweight, 0.8)])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_reported() {
        let kb = kb();
        kb.store()
            .set(PATTERNS_NAMESPACE, "example.com", serde_json::json!({"nope": true}))
            .await
            .unwrap();
        let err = kb.snapshot("example.com").await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }
}
