//! Bounded-concurrency acquisition of many URLs.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::time::Instant;

use super::{elapsed_ms, AcquireOptions, AcquireResponse, TierOrchestrator};

#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub url: String,
    #[serde(flatten)]
    pub response: AcquireResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    /// One entry per input URL, in input order.
    pub results: Vec<BatchItem>,
    pub total_time_ms: u64,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.response.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

impl TierOrchestrator {
    /// Acquire every URL, at most `batch_concurrency` at a time. Each URL is
    /// an independent `acquire` call; one failure never affects the others.
    pub async fn acquire_batch(&self, urls: &[String], options: &AcquireOptions) -> BatchResult {
        let started = Instant::now();
        let concurrency = self.config.batch_concurrency.max(1);

        let mut results: Vec<(usize, BatchItem)> = stream::iter(urls.iter().enumerate())
            .map(|(index, url)| async move {
                let response = self.acquire(url, options).await;
                (
                    index,
                    BatchItem {
                        url: url.clone(),
                        response,
                    },
                )
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let result = BatchResult {
            results: results.into_iter().map(|(_, item)| item).collect(),
            total_time_ms: elapsed_ms(started),
        };
        tracing::info!(
            urls = urls.len(),
            succeeded = result.succeeded(),
            failed = result.failed(),
            total_ms = result.total_time_ms,
            "batch complete"
        );
        result
    }
}
