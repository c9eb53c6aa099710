//! Single-shot HTTP GET with failure classification.
//!
//! Retry is the engine's job, so this client never loops: every error is
//! turned into a [`TierFailure`] whose kind says whether a retry is worth it.

use std::time::Duration;

use unbrowser::{FailureKind, ProxyEndpoint, TierFailure};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/131.0.0.0 Safari/537.36";

/// Phrases that mark a bot-challenge interstitial.
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-challenge",
    "challenge-platform",
    "verify you are human",
    "captcha",
    "attention required",
    "unusual traffic",
];

/// Only bodies this short are checked for challenge markers.
const CHALLENGE_MAX_BYTES: usize = 64 * 1024;

/// A successful response.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl Fetched {
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("json"))
            .unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout, None)?,
            timeout,
        })
    }

    /// GET `url` within `budget`, optionally through `proxy`.
    pub async fn get(
        &self,
        url: &str,
        budget: Duration,
        accept: &str,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Fetched, TierFailure> {
        let client = match proxy {
            Some(endpoint) => build_client(self.timeout, Some(endpoint)).map_err(|e| {
                TierFailure::unsupported(format!("proxy '{}' unusable: {e}", endpoint.url))
            })?,
            None => self.client.clone(),
        };

        let response = client
            .get(url)
            .header(reqwest::header::ACCEPT, accept)
            .timeout(budget.min(self.timeout))
            .send()
            .await
            .map_err(|e| classify_error(&e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());

        let body = response.text().await.map_err(|e| classify_error(&e))?;

        if let Some(marker) = challenge_marker(status, &body) {
            return Err(TierFailure {
                kind: FailureKind::Blocked,
                reason: format!("bot challenge page (HTTP {status}, marker '{marker}')"),
                status: Some(status),
                retry_after_secs: None,
            });
        }
        if !(200..400).contains(&status) {
            return Err(TierFailure::from_status(status, format!("HTTP {status} from {final_url}"))
                .with_retry_after(retry_after));
        }

        Ok(Fetched {
            final_url,
            status,
            content_type,
            body,
        })
    }
}

fn build_client(timeout: Duration, proxy: Option<&ProxyEndpoint>) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent(USER_AGENT);
    if let Some(endpoint) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(&endpoint.url)?);
    }
    Ok(builder.build()?)
}

fn classify_error(e: &reqwest::Error) -> TierFailure {
    if e.is_timeout() {
        TierFailure::timeout(format!("request timed out: {e}"))
    } else if let Some(status) = e.status() {
        TierFailure::from_status(status.as_u16(), e.to_string())
    } else {
        // Connect, DNS, TLS, reset and body-decode errors.
        TierFailure::new(FailureKind::Network, e.to_string())
    }
}

/// Challenge pages come back as 403/429/503 (or occasionally 200) with a
/// short body naming the vendor's challenge script.
fn challenge_marker(status: u16, body: &str) -> Option<&'static str> {
    if !matches!(status, 200 | 403 | 429 | 503) || body.len() > CHALLENGE_MAX_BYTES {
        return None;
    }
    let lower = body.to_lowercase();
    let marker = CHALLENGE_MARKERS.iter().find(|m| lower.contains(*m))?;
    // A long 200 page that mentions a captcha in passing is still content.
    if status == 200 && lower.len() > 4096 {
        return None;
    }
    Some(*marker)
}
