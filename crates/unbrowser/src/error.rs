//! Error taxonomy for the acquisition engine.
//!
//! Tier failures are split into transient (retried), permanent (escalate to
//! the next tier immediately) and validation failures (the tier answered but
//! the content is unusable). Storage errors degrade to "no learned pattern"
//! and never abort an acquisition. `Exhausted` is the only caller-visible
//! failure and always travels with a full decision trace.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Tier;

/// Errors raised by a [`PersistenceStore`](crate::store::PersistenceStore).
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt record {namespace}/{key}: {reason}")]
    Corrupt {
        namespace: String,
        key: String,
        reason: String,
    },

    #[error("Storage task failed: {0}")]
    Task(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A tier name that does not parse.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown tier '{0}' (expected intelligence, lightweight or playwright)")]
pub struct UnknownTier(pub String);

/// Why a tier execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Request or tier timed out.
    Timeout,
    /// Connection reset, DNS failure, TLS handshake error.
    Network,
    /// 502/503/504 and other 5xx answers.
    ServerError,
    /// HTTP 429 or an explicit throttling page.
    RateLimited,
    /// 401/403 requiring credentials.
    AuthRequired,
    /// Explicit bot/block detection.
    Blocked,
    /// Other 4xx answers.
    ClientError,
    /// The tier cannot handle this request (no endpoint known, no browser).
    Unsupported,
    /// The tier answered but the content failed the minimum-content policy.
    Validation,
}

impl FailureKind {
    /// Whether a failure of this kind is worth retrying within the same tier.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::Network | FailureKind::ServerError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Network => "network",
            FailureKind::ServerError => "server_error",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::AuthRequired => "auth_required",
            FailureKind::Blocked => "blocked",
            FailureKind::ClientError => "client_error",
            FailureKind::Unsupported => "unsupported",
            FailureKind::Validation => "validation",
        }
    }

    /// Classify an HTTP status code. Returns `None` for 2xx/3xx.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=399 => None,
            401 | 403 | 407 => Some(FailureKind::AuthRequired),
            408 => Some(FailureKind::Timeout),
            429 => Some(FailureKind::RateLimited),
            451 => Some(FailureKind::Blocked),
            400..=499 => Some(FailureKind::ClientError),
            _ => Some(FailureKind::ServerError),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a [`TierExecutor`](crate::tier::TierExecutor).
///
/// Retryability is decided at this boundary: executors classify their own
/// errors and the orchestrator only consults [`TierFailure::retryable`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {reason}")]
pub struct TierFailure {
    pub kind: FailureKind,
    pub reason: String,
    /// HTTP status that produced the failure, when there was one.
    pub status: Option<u16>,
    /// Server-provided `Retry-After`, in seconds.
    pub retry_after_secs: Option<u64>,
}

impl TierFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            status: None,
            retry_after_secs: None,
        }
    }

    /// Build a failure from a non-success HTTP status.
    pub fn from_status(status: u16, reason: impl Into<String>) -> Self {
        let kind = FailureKind::from_status(status).unwrap_or(FailureKind::ClientError);
        Self {
            kind,
            reason: reason.into(),
            status: Some(status),
            retry_after_secs: None,
        }
    }

    pub fn with_retry_after(mut self, secs: Option<u64>) -> Self {
        self.retry_after_secs = secs;
        self
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, reason)
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Unsupported, reason)
    }

    pub fn retryable(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Terminal, caller-visible failure of an acquisition.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum AcquireFailure {
    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("all permitted tiers (up to {max_cost_tier}) failed after {attempted} attempt(s): {reason}")]
    Exhausted {
        attempted: usize,
        max_cost_tier: Tier,
        reason: String,
    },
}
