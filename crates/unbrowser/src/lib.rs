// Copyright 2026 Unbrowser Contributors
// SPDX-License-Identifier: MIT

//! Unbrowser: a tiered content acquisition engine.
//!
//! Given a URL, the [`TierOrchestrator`] picks an ordered sequence of
//! acquisition tiers (a learned API pattern, a plain HTTP fetch, a headless
//! browser), runs them with validation and fallback, explains every attempt in
//! a [`DecisionTrace`], and feeds the outcome back into a confidence-scored,
//! provenance-tracked [`KnowledgeBase`] so later requests get cheaper.

pub mod confidence;
pub mod config;
pub mod error;
pub mod extraction;
pub mod knowledge;
pub mod orchestrator;
pub mod provenance;
pub mod retry;
pub mod store;
pub mod tier;
pub mod trace;
pub mod types;
pub mod validation;

pub use confidence::{ConfidenceLevel, ExtractionSource, FieldConfidence};
pub use config::{EngineConfig, KnowledgeConfig};
pub use error::{AcquireFailure, FailureKind, StorageError, TierFailure};
pub use extraction::{ContentCandidate, TitleCandidate};
pub use knowledge::{
    DomainIntelligence, DomainKnowledge, KnowledgeBase, Observation, Outcome, Pattern,
    PatternKind, PatternPayload, Quirk,
};
pub use orchestrator::{
    AcquireOptions, AcquireResponse, AcquiredContent, BatchResult, BrowsePreview, ContentFormat,
    TierOrchestrator,
};
pub use provenance::{DecayEvent, DecayReason, ProvenanceMetadata, ProvenanceSource};
pub use retry::RetryPolicy;
pub use store::{JsonFileStore, MemoryStore, PersistenceStore, SqliteStore};
pub use tier::{DiscoveredApi, ProxyEndpoint, ProxyProvider, TierExecutor, TierRequest, TierResult};
pub use trace::{DecisionTrace, DecisionTraceBuilder, SelectorAttempt, TierAttempt, TitleAttempt, TraceSummary};
pub use types::{domain_of, page_of, Tier};
pub use validation::{ValidationPolicy, VerificationMode, VerificationResult, VerifyOptions};
