//! Report synthesis and citation validation.

use chrono::Utc;
use delve_core::{
    Citation, Error, Message, ResearchEvent, ResearchRequest, RunState, UnitStatus,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::citations::{ensure_sources_section, strip_unknown_urls};
use crate::context::ResearchContext;
use crate::prompts::REPORT_PROMPT;

/// Marker placed in reports written without any findings.
pub const INSUFFICIENT_FINDINGS: &str = "Insufficient findings";

/// The final research report.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub markdown: String,
    /// Sources the report may cite, in numbering order.
    pub citations: Vec<Citation>,
    /// URLs removed from the text because research never returned them.
    pub stripped_citations: Vec<String>,
    /// True when the report was written without findings.
    pub insufficient: bool,
}

/// Write the report for a finished run.
///
/// Fails only when the final-report model call fails after retries; the
/// error then carries the digest as a plain-text fallback.
pub async fn synthesize(
    ctx: &ResearchContext,
    request: &ResearchRequest,
    state: &RunState,
) -> Result<Report, Error> {
    let digest = &state.digest;

    if !digest.has_findings() {
        warn!(run_id = %request.id, "No findings, writing insufficient-findings report");
        let report = insufficient_report(request, state);
        publish(ctx, &report);
        return Ok(report);
    }

    let citations = digest.citations();
    let messages = vec![
        Message::system(REPORT_PROMPT),
        Message::user(report_brief(request, &digest.summary, &citations)),
    ];
    let model = &ctx.models.final_report;

    let reply = ctx
        .retry
        .run("final_report", || model.complete(messages.clone(), Vec::new()))
        .await
        .map_err(|e| Error::SynthesisFailed {
            reason: e.to_string(),
            fallback: digest.fallback_text(),
        })?;

    if reply.content.trim().is_empty() {
        return Err(Error::SynthesisFailed {
            reason: "final report model returned an empty report".into(),
            fallback: digest.fallback_text(),
        });
    }

    let validated = strip_unknown_urls(&reply.content, &digest.citation_keys());
    if !validated.stripped.is_empty() {
        warn!(
            run_id = %request.id,
            stripped = validated.stripped.len(),
            "Removed citations not returned by research"
        );
    }

    let report = Report {
        markdown: ensure_sources_section(&validated.text, &citations),
        citations,
        stripped_citations: validated.stripped,
        insufficient: false,
    };
    info!(run_id = %request.id, citations = report.citations.len(), "Report synthesized");
    publish(ctx, &report);
    Ok(report)
}

fn report_brief(request: &ResearchRequest, summary: &str, citations: &[Citation]) -> String {
    let mut brief = format!(
        "Research request:\n{}\n\nToday's date: {}\n\nFindings:\n{}\n\nSources:\n",
        request.brief(),
        Utc::now().format("%Y-%m-%d"),
        summary
    );
    for (i, c) in citations.iter().enumerate() {
        brief.push_str(&format!("[{}] {}: {}\n", i + 1, c.title, c.url));
    }
    brief
}

/// Deterministic report for a run that found nothing.
fn insufficient_report(request: &ResearchRequest, state: &RunState) -> Report {
    let mut markdown = format!(
        "# {}\n\n**{INSUFFICIENT_FINDINGS}.** Research did not return usable findings for this question.\n",
        request.question.trim()
    );
    if let Some(reason) = &state.failure {
        markdown.push_str(&format!("\nReason: {reason}.\n"));
    }

    if !state.digest.results.is_empty() {
        markdown.push_str("\n## Research units\n\n");
        for r in &state.digest.results {
            let status = match r.status {
                UnitStatus::Completed => "completed without findings",
                UnitStatus::BudgetExceeded => "search budget exhausted",
                UnitStatus::Failed => "failed",
            };
            markdown.push_str(&format!("- {} ({status}", r.topic));
            if let Some(error) = &r.error {
                markdown.push_str(&format!(": {error}"));
            }
            markdown.push_str(")\n");
        }
    }

    Report {
        markdown,
        citations: Vec::new(),
        stripped_citations: Vec::new(),
        insufficient: true,
    }
}

fn publish(ctx: &ResearchContext, report: &Report) {
    ctx.publish(ResearchEvent::ReportSynthesized {
        citations: report.citations.len(),
        stripped_citations: report.stripped_citations.len(),
        timestamp: Utc::now(),
    });
}
