//! Bounded exponential-backoff retry for transient tier failures.
//!
//! Delays start at `initial_delay_ms` and grow by `backoff_multiplier` per
//! retry, capped at `max_delay_ms`. The error from the final attempt (or the
//! first non-retryable one) is returned unchanged so callers can still match
//! on it.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Retry limits and backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total calls, including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one call.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// The sleep before each retry, in order (`max_attempts - 1` entries).
    pub fn delays(&self) -> Vec<Duration> {
        let mut out = Vec::new();
        let mut delay = self.initial_delay_ms.min(self.max_delay_ms);
        for _ in 1..self.max_attempts.max(1) {
            out.push(Duration::from_millis(delay));
            delay = self.next_delay(delay);
        }
        out
    }

    fn next_delay(&self, current_ms: u64) -> u64 {
        let scaled = current_ms as f64 * self.backoff_multiplier.max(1.0);
        if scaled >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            scaled as u64
        }
    }
}

/// Default retry predicate: timeouts, network errors and 5xx statuses.
///
/// Status codes only match as whole tokens, so "5000 chars" is not a 500.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    let phrase = [
        "timeout",
        "timed out",
        "network",
        "connection reset",
        "connection refused",
        "connection closed",
        "econnreset",
    ]
    .iter()
    .any(|needle| lower.contains(needle));
    phrase
        || lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|token| matches!(token, "500" | "502" | "503" | "504"))
}

/// Retry `op` using the default message-based predicate.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_using(
        policy,
        op,
        |e: &E| is_transient_message(&e.to_string()),
        |_, _, _| {},
    )
    .await
}

/// Retry `op` while `retry_on` accepts the error and attempts remain.
///
/// `on_retry(attempt, error, delay)` fires before each sleep, where
/// `attempt` is the 1-based number of the call that just failed.
pub async fn with_retry_using<T, E, F, Fut, R, C>(
    policy: &RetryPolicy,
    mut op: F,
    retry_on: R,
    mut on_retry: C,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    C: FnMut(u32, &E, Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay_ms = policy.initial_delay_ms.min(policy.max_delay_ms);
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_attempts || !retry_on(&err) {
                    return Err(err);
                }
                let delay = Duration::from_millis(delay_ms);
                on_retry(attempt, &err, delay);
                tokio::time::sleep(delay).await;
                delay_ms = policy.next_delay(delay_ms);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct FakeError(&'static str);

    impl Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 3,
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retries_until_exhausted_and_preserves_error() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();

        let result: Result<(), FakeError> = with_retry_using(
            &fast_policy(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError("503 service unavailable")) }
            },
            |e| is_transient_message(&e.to_string()),
            |attempt, _, delay| retries.push((attempt, delay)),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err(), FakeError("503 service unavailable"));
        assert_eq!(
            retries,
            vec![(1, Duration::from_millis(1)), (2, Duration::from_millis(2))]
        );
    }

    #[test]
    fn test_non_retryable_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<(), FakeError> = tokio_test::block_on(with_retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FakeError("403 forbidden")) }
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err(), FakeError("403 forbidden"));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, FakeError> = with_retry(&fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(FakeError("connection reset by peer"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_delay_sequence_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        };
        let delays: Vec<u64> = policy.delays().iter().map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 5000, 5000]);
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 1000);
        assert_eq!(policy.max_delay_ms, 30_000);
        assert_eq!(policy.backoff_multiplier, 2.0);
        assert_eq!(policy.delays().len(), 2);
        assert!(RetryPolicy::no_retry().delays().is_empty());
    }

    #[test]
    fn test_default_predicate() {
        assert!(is_transient_message("operation timed out"));
        assert!(is_transient_message("HTTP 504 Gateway Timeout"));
        assert!(is_transient_message("Network unreachable"));
        assert!(!is_transient_message("401 unauthorized"));
        assert!(!is_transient_message("blocked by bot protection"));
    }

    #[test]
    fn test_status_codes_match_whole_tokens() {
        assert!(is_transient_message("503"));
        assert!(is_transient_message("upstream returned status=502"));
        assert!(!is_transient_message("insufficient content: 5000 chars (minimum 200)"));
        assert!(!is_transient_message("request id 15034"));
    }
}
