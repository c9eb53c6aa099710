//! Round-robin proxy pool built from `--proxy` flags.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use unbrowser::{ProxyEndpoint, ProxyProvider};

/// Failures after which an endpoint is no longer offered for a domain.
const MAX_FAILURES_PER_DOMAIN: u32 = 2;

/// Rotates through a fixed list of proxies, skipping endpoints that keep
/// failing for a given domain.
pub struct StaticProxyPool {
    endpoints: Vec<ProxyEndpoint>,
    cursor: AtomicUsize,
    failures: Mutex<HashMap<(String, String), u32>>,
}

impl StaticProxyPool {
    pub fn new(urls: impl IntoIterator<Item = String>) -> Self {
        let endpoints = urls
            .into_iter()
            .map(|url| ProxyEndpoint {
                url,
                session_id: None,
            })
            .collect();
        Self {
            endpoints,
            cursor: AtomicUsize::new(0),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    fn failure_count(&self, endpoint: &ProxyEndpoint, domain: &str) -> u32 {
        match self.failures.lock() {
            Ok(map) => map
                .get(&(endpoint.url.clone(), domain.to_string()))
                .copied()
                .unwrap_or(0),
            Err(_) => 0,
        }
    }
}

impl ProxyProvider for StaticProxyPool {
    fn next_endpoint(&self, domain: &str) -> Option<ProxyEndpoint> {
        let n = self.endpoints.len();
        for _ in 0..n {
            let i = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
            let endpoint = &self.endpoints[i];
            if self.failure_count(endpoint, domain) < MAX_FAILURES_PER_DOMAIN {
                return Some(endpoint.clone());
            }
        }
        tracing::debug!(domain, "every proxy exhausted for domain, going direct");
        None
    }

    fn report_failure(&self, endpoint: &ProxyEndpoint, domain: &str) {
        if let Ok(mut map) = self.failures.lock() {
            let count = map
                .entry((endpoint.url.clone(), domain.to_string()))
                .or_insert(0);
            *count += 1;
            tracing::info!(proxy = %endpoint.url, domain, failures = *count, "proxy failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> StaticProxyPool {
        StaticProxyPool::new(["http://p1:8080".to_string(), "http://p2:8080".to_string()])
    }

    #[test]
    fn test_round_robin() {
        let pool = pool();
        let urls: Vec<String> = (0..4)
            .map(|_| pool.next_endpoint("example.com").unwrap().url)
            .collect();
        assert_eq!(
            urls,
            vec!["http://p1:8080", "http://p2:8080", "http://p1:8080", "http://p2:8080"]
        );
    }

    #[test]
    fn test_failing_endpoint_skipped_per_domain() {
        let pool = pool();
        let p1 = pool.endpoints[0].clone();
        pool.report_failure(&p1, "example.com");
        pool.report_failure(&p1, "example.com");

        for _ in 0..3 {
            assert_eq!(pool.next_endpoint("example.com").unwrap().url, "http://p2:8080");
        }
        // Other domains still see both.
        let other: Vec<String> = (0..2)
            .map(|_| pool.next_endpoint("other.org").unwrap().url)
            .collect();
        assert!(other.contains(&"http://p1:8080".to_string()));
    }

    #[test]
    fn test_empty_pool_goes_direct() {
        let pool = StaticProxyPool::new(Vec::new());
        assert!(pool.is_empty());
        assert!(pool.next_endpoint("example.com").is_none());
    }
}
