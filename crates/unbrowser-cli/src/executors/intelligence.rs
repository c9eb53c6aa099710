//! The intelligence tier: call a backend endpoint learned for the domain
//! instead of fetching the page.

use async_trait::async_trait;
use serde_json::Value;

use unbrowser::extraction::framework::collect_text;
use unbrowser::{
    ContentCandidate, ExtractionSource, PatternPayload, Tier, TierExecutor, TierFailure,
    TierRequest, TierResult, TitleCandidate,
};

use super::html;
use super::http::HttpFetcher;

const ACCEPT_JSON: &str = "application/json";

const MAX_API_CHARS: usize = 200_000;

/// Fields that usually hold the main body in CMS and headless APIs.
const BODY_FIELDS: &[&str] = &["content", "body", "articleBody", "text", "html"];

const TITLE_FIELDS: &[&str] = &["title", "headline", "name"];

pub struct IntelligenceExecutor {
    http: HttpFetcher,
}

impl IntelligenceExecutor {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TierExecutor for IntelligenceExecutor {
    fn tier(&self) -> Tier {
        Tier::Intelligence
    }

    async fn execute(&self, request: &TierRequest) -> Result<TierResult, TierFailure> {
        let Some(PatternPayload::Api {
            endpoint, method, ..
        }) = request.pattern.as_ref().map(|p| &p.payload)
        else {
            return Err(TierFailure::unsupported("no learned endpoint for domain"));
        };
        if !method.eq_ignore_ascii_case("GET") {
            return Err(TierFailure::unsupported(format!("{method} endpoints are not replayed")));
        }

        let fetched = self.http.get(endpoint, request.budget, ACCEPT_JSON, None).await?;
        let value: Value = serde_json::from_str(&fetched.body).map_err(|e| {
            TierFailure::unsupported(format!("endpoint did not return JSON: {e}"))
        })?;

        tracing::debug!(url = %request.url, endpoint = %endpoint, "api endpoint answered");
        Ok(TierResult {
            final_url: Some(request.url.clone()),
            status: Some(fetched.status),
            content_candidates: api_candidates(endpoint, &value),
            title_candidates: vec![TitleCandidate::new(
                "api:title",
                ExtractionSource::ApiResponse,
                TITLE_FIELDS.iter().find_map(|f| field_text(&value, f)),
            )],
            discovered_apis: Vec::new(),
            proxied: false,
        })
    }
}

/// A string field, or the `rendered` string of a `{ "rendered": ... }` object.
fn field_text(value: &Value, field: &str) -> Option<String> {
    let raw = match value.get(field)? {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get("rendered")?.as_str()?,
        _ => return None,
    };
    let text = if raw.trim_start().starts_with('<') {
        html::fragment_text(raw)
    } else {
        raw.trim().to_string()
    };
    (!text.is_empty()).then_some(text)
}

fn api_candidates(endpoint: &str, value: &Value) -> Vec<ContentCandidate> {
    let mut out: Vec<ContentCandidate> = BODY_FIELDS
        .iter()
        .filter_map(|f| {
            field_text(value, f).map(|text| {
                ContentCandidate::new(format!("api:{f}"), ExtractionSource::ApiResponse, Some(text))
            })
        })
        .take(1)
        .collect();
    out.push(ContentCandidate::new(
        endpoint,
        ExtractionSource::Heuristic,
        Some(collect_text(value, MAX_API_CHARS)).filter(|t| !t.is_empty()),
    ));
    out
}
