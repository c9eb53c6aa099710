//! The lightweight tier: one plain HTTP GET and static extraction.

use std::sync::Arc;

use async_trait::async_trait;

use unbrowser::{
    FailureKind, PatternPayload, ProxyProvider, Tier, TierExecutor, TierFailure, TierRequest,
    TierResult,
};

use super::html;
use super::http::HttpFetcher;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8";

pub struct LightweightExecutor {
    http: HttpFetcher,
    proxies: Option<Arc<dyn ProxyProvider>>,
}

impl LightweightExecutor {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http, proxies: None }
    }

    /// Route requests through `proxies`.
    pub fn with_proxies(mut self, proxies: Arc<dyn ProxyProvider>) -> Self {
        self.proxies = Some(proxies);
        self
    }
}

#[async_trait]
impl TierExecutor for LightweightExecutor {
    fn tier(&self) -> Tier {
        Tier::Lightweight
    }

    async fn execute(&self, request: &TierRequest) -> Result<TierResult, TierFailure> {
        let endpoint = self
            .proxies
            .as_ref()
            .and_then(|p| p.next_endpoint(&request.domain));

        let fetched = match self
            .http
            .get(&request.url, request.budget, ACCEPT_HTML, endpoint.as_ref())
            .await
        {
            Ok(fetched) => fetched,
            Err(failure) => {
                if let (Some(pool), Some(endpoint)) = (&self.proxies, &endpoint) {
                    if matches!(
                        failure.kind,
                        FailureKind::Blocked | FailureKind::RateLimited | FailureKind::Network
                    ) {
                        pool.report_failure(endpoint, &request.domain);
                    }
                }
                return Err(failure);
            }
        };

        let learned = request.pattern.as_ref().and_then(|p| match &p.payload {
            PatternPayload::Selector { selector, .. } => Some(selector.as_str()),
            _ => None,
        });
        let found = html::gather(&fetched.body, &fetched.final_url, learned);

        let has_text = found.content.iter().any(|c| c.content.is_some());
        if !has_text && html::looks_like_js_shell(&fetched.body) {
            return Err(TierFailure::unsupported(
                "page is a client-rendered shell with no server-side text",
            ));
        }

        tracing::debug!(
            url = %request.url,
            status = fetched.status,
            candidates = found.content.len(),
            apis = found.apis.len(),
            "lightweight fetch complete"
        );

        Ok(TierResult {
            final_url: Some(fetched.final_url),
            status: Some(fetched.status),
            content_candidates: found.content,
            title_candidates: found.titles,
            discovered_apis: found.apis,
            proxied: endpoint.is_some(),
        })
    }
}
