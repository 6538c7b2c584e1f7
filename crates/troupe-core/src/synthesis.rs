//! Synthesis support: context building, single-result bypass, report
//! formatting, and the reflection pass.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info};

use troupe_models::{AgentExecutionResult, Citation};
use troupe_traits::{Activities, SynthesisOutput, SynthesisRequest};

use crate::config::ReflectionConfig;
use crate::error::Result;
use crate::retry::with_retries;

/// Roles whose output must stay structured and never be bypassed raw.
const STRUCTURED_OUTPUT_ROLES: &[&str] = &["extractor", "data_analyst", "classifier"];

/// Short preview of a final answer for progress events.
pub fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 200;
    if text.chars().count() <= MAX_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_CHARS).collect();
    out.push_str("...");
    out
}

/// Whether a lone successful agent result may be returned unsynthesized.
pub fn can_bypass_synthesis(
    results: &[AgentExecutionResult],
    bypass_single_result: bool,
    citations_collected: usize,
) -> bool {
    if !bypass_single_result || citations_collected > 0 {
        return false;
    }
    let successes: Vec<&AgentExecutionResult> = results.iter().filter(|r| r.success).collect();
    let [only] = successes.as_slice() else {
        return false;
    };
    let trimmed = only.response.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return false;
    }
    if only.used_tool("web_search") {
        return false;
    }
    !STRUCTURED_OUTPUT_ROLES.contains(&only.role.as_str())
}

/// One line of the numbered citation block: `[i] Title (URL) - Source` with
/// the published date appended when known.
pub fn format_citation_line(index: usize, citation: &Citation) -> String {
    let title = if citation.title.is_empty() {
        citation.url.as_str()
    } else {
        citation.title.as_str()
    };
    let mut line = format!("[{index}] {title} ({})", citation.url);
    if !citation.source.is_empty() {
        line.push_str(&format!(" - {}", citation.source));
    }
    if let Some(date) = &citation.published_date {
        line.push_str(&format!(", {date}"));
    }
    line
}

/// Build the context handed to the synthesis activity.
///
/// Copies the request context, forces `synthesis_style = "comprehensive"`
/// for research runs, and adds the numbered `available_citations` block plus
/// `citation_count`.
pub fn build_synthesis_context(
    base_context: &Value,
    research_areas_present: bool,
    citations: &[Citation],
) -> Value {
    let mut map = match base_context {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    if research_areas_present && !map.contains_key("synthesis_style") {
        map.insert(
            "synthesis_style".to_string(),
            Value::String("comprehensive".to_string()),
        );
    }

    if !citations.is_empty() {
        let block = citations
            .iter()
            .enumerate()
            .map(|(i, c)| format_citation_line(i + 1, c))
            .collect::<Vec<_>>()
            .join("\n");
        map.insert("available_citations".to_string(), Value::String(block));
    }
    map.insert(
        "citation_count".to_string(),
        Value::Number(citations.len().into()),
    );

    Value::Object(map)
}

static INLINE_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("valid regex"));

const SOURCES_HEADER: &str = "## Sources";

/// Append a rebuilt `## Sources` section to a report.
///
/// Inline `[n]` markers decide which citations are labeled "Used inline";
/// the rest are "Additional source". Any existing Sources section (by last
/// occurrence) is removed first, which makes the operation idempotent.
pub fn format_report_with_citations(report: &str, citations: &[Citation]) -> String {
    if citations.is_empty() {
        return report.to_string();
    }

    let body = strip_sources_section(report);

    let inline: std::collections::HashSet<usize> = INLINE_MARKER_RE
        .captures_iter(&body)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .collect();

    let mut out = String::with_capacity(body.len() + citations.len() * 80);
    out.push_str(body.trim_end());
    out.push_str("\n\n");
    out.push_str(SOURCES_HEADER);
    out.push('\n');
    for (i, citation) in citations.iter().enumerate() {
        let number = i + 1;
        let label = if inline.contains(&number) {
            "Used inline"
        } else {
            "Additional source"
        };
        out.push('\n');
        out.push_str(&format!("{} - {label}", format_citation_line(number, citation)));
    }
    out.push('\n');
    out
}

fn strip_sources_section(report: &str) -> String {
    if let Some(position) = report.rfind(SOURCES_HEADER) {
        // Only strip when the header starts a line.
        let line_start = position == 0 || report[..position].ends_with('\n');
        if line_start {
            return report[..position].trim_end().to_string();
        }
    }
    report.to_string()
}

/// Outcome of the reflection pass.
#[derive(Debug, Clone)]
pub struct ReflectionOutcome {
    pub output: SynthesisOutput,
    /// Extra tokens consumed by evaluation plus re-synthesis, recorded by
    /// the caller under the reflection phase.
    pub reflection_tokens: u64,
    pub attempts: u32,
}

/// Evaluate a candidate answer and re-synthesize while it scores below the
/// confidence threshold, up to `max_retries` times.
pub async fn run_reflection(
    activities: &Activities,
    config: &ReflectionConfig,
    query: &str,
    mut request: SynthesisRequest,
    mut output: SynthesisOutput,
) -> Result<ReflectionOutcome> {
    let mut reflection_tokens = 0u64;
    let mut attempts = 0u32;

    if !config.enabled {
        return Ok(ReflectionOutcome {
            output,
            reflection_tokens,
            attempts,
        });
    }

    while attempts < config.max_retries {
        let evaluation = activities
            .synthesizer
            .evaluate_result(query, &output.final_result, "accuracy, completeness")
            .await?;
        if evaluation.score >= config.confidence_threshold {
            debug!(score = evaluation.score, attempts, "Reflection satisfied");
            break;
        }
        attempts += 1;
        info!(
            score = evaluation.score,
            attempt = attempts,
            "Reflection below threshold, re-synthesizing"
        );

        if let Value::Object(map) = &mut request.context {
            map.insert(
                "reflection_feedback".to_string(),
                Value::String(evaluation.feedback.clone()),
            );
            map.insert(
                "previous_response".to_string(),
                Value::String(output.final_result.clone()),
            );
        }

        let retried = request.clone();
        let synthesizer = activities.synthesizer.clone();
        output = with_retries("synthesize", 3, move || {
            let synthesizer = synthesizer.clone();
            let request = retried.clone();
            async move { synthesizer.synthesize(request).await }
        })
        .await?;
        reflection_tokens += output.tokens_used;
    }

    Ok(ReflectionOutcome {
        output,
        reflection_tokens,
        attempts,
    })
}
