//! Human-readable rendering of engine results. `--json` bypasses all of this.

use std::fmt::Write as _;

use unbrowser::{AcquireResponse, BatchResult, BrowsePreview, DecisionTrace};

/// Content first, then a short provenance footer.
pub fn render_acquire(response: &AcquireResponse) -> String {
    let mut out = String::new();
    match &response.result {
        Ok(content) => {
            if let Some(title) = &content.title {
                let _ = writeln!(out, "# {title}\n");
            }
            let _ = writeln!(out, "{}", content.content);
            if content.truncated {
                let _ = writeln!(out, "\n[truncated]");
            }
            let _ = writeln!(
                out,
                "\n-- {} via {} ({}), confidence {:.2} ({}), {} ms",
                content.final_url,
                content.tier,
                content.extraction_strategy,
                content.confidence.score,
                content.confidence.level(),
                content.load_time_ms
            );
        }
        Err(failure) => {
            let _ = writeln!(out, "error: {failure}");
        }
    }
    out.push_str(&render_trace(&response.trace));
    out
}

pub fn render_trace(trace: &DecisionTrace) -> String {
    let mut out = String::new();
    for attempt in trace.tier_attempts() {
        let status = if attempt.success { "ok" } else { "failed" };
        let _ = write!(out, "   {:<12} {:<6} {:>6} ms", attempt.tier.as_str(), status, attempt.duration_ms);
        if attempt.calls > 1 {
            let _ = write!(out, "  ({} calls)", attempt.calls);
        }
        if let Some(reason) = &attempt.failure_reason {
            let _ = write!(out, "  {reason}");
        }
        out.push('\n');
    }
    let summary = trace.summary();
    if summary.fallback_used {
        let _ = writeln!(
            out,
            "   fallback selector: {}",
            summary.final_selector.as_deref().unwrap_or("-")
        );
    }
    out
}

pub fn render_preview(preview: &BrowsePreview) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "plan: {} (confidence {:?}, expected {} ms, {}..{} ms)",
        preview
            .plan
            .tiers()
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(" -> "),
        preview.confidence.overall,
        preview.estimated_time.expected_ms,
        preview.estimated_time.min_ms,
        preview.estimated_time.max_ms,
    );
    let _ = writeln!(out, "reasoning: {}", preview.plan.reasoning);
    let mut plan = Some(&preview.plan);
    while let Some(p) = plan {
        for step in &p.steps {
            let _ = writeln!(
                out,
                "   {:<12} {:<10} ~{} ms  {:?}  {}",
                step.tier.as_str(),
                step.action,
                step.expected_duration_ms,
                step.confidence,
                step.reason.as_deref().unwrap_or("")
            );
        }
        plan = p.fallback_plan.as_deref();
    }
    out
}

pub fn render_batch(batch: &BatchResult) -> String {
    let mut out = String::new();
    for item in &batch.results {
        match &item.response.result {
            Ok(content) => {
                let _ = writeln!(
                    out,
                    "ok      {}  {} chars via {}",
                    item.url,
                    content.content.chars().count(),
                    content.tier
                );
            }
            Err(failure) => {
                let _ = writeln!(out, "failed  {}  {failure}", item.url);
            }
        }
    }
    let _ = writeln!(
        out,
        "{} ok, {} failed in {} ms",
        batch.succeeded(),
        batch.failed(),
        batch.total_time_ms
    );
    out
}
