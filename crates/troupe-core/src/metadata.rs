//! Per-agent usage aggregation and numeric extraction helpers.

use std::collections::HashMap;

use troupe_models::{AgentExecutionResult, AgentUsage};
use troupe_traits::SynthesisOutput;

use crate::pricing;

/// Rollup of agent and synthesis usage for result metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatedUsage {
    pub model_used: String,
    pub provider: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub agent_usages: Vec<AgentUsage>,
}

/// Aggregate per-agent usage plus an optional synthesis step.
///
/// The primary model is the most frequent among successful results; the
/// primary provider the most frequent non-empty one, detected from the model
/// name as a fallback. Token splits fall back 60/40 when an activity only
/// reported a total. `agent_usages` is always populated, one row per agent
/// and one for synthesis when present.
pub fn aggregate_agent_metadata(
    results: &[AgentExecutionResult],
    synthesis: Option<&SynthesisOutput>,
) -> AggregatedUsage {
    if results.is_empty() && synthesis.is_none_or(|s| s.tokens_used == 0) {
        return AggregatedUsage::default();
    }

    let model_used = most_frequent(
        results
            .iter()
            .filter(|r| r.success && !r.model_used.is_empty())
            .map(|r| r.model_used.as_str()),
    )
    .unwrap_or_default();

    let provider = most_frequent(
        results
            .iter()
            .filter(|r| !r.provider.is_empty())
            .map(|r| r.provider.as_str()),
    )
    .map(str::to_string)
    .or_else(|| pricing::detect_provider(&model_used).map(str::to_string))
    .unwrap_or_default();

    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;
    let mut agent_usages = Vec::with_capacity(results.len() + 1);

    for result in results {
        let (input, output) = result.token_split();
        input_tokens += input;
        output_tokens += output;
        let model = pricing::resolve_model(&result.model_used, None);
        agent_usages.push(AgentUsage {
            agent_id: result.agent_id.clone(),
            model: result.model_used.clone(),
            provider: result.provider.clone(),
            input_tokens: input,
            output_tokens: output,
            tokens_used: input + output,
            cost_usd: pricing::cost_for_split(model, input, output),
            duration_ms: result.duration_ms,
        });
    }

    let mut total_tokens = input_tokens + output_tokens;

    if let Some(synthesis) = synthesis {
        if synthesis.tokens_used > 0 {
            total_tokens += synthesis.tokens_used;
            let model = pricing::resolve_model(&synthesis.model_used, None);
            agent_usages.push(AgentUsage {
                agent_id: "synthesis".to_string(),
                model: synthesis.model_used.clone(),
                provider: synthesis.provider.clone(),
                input_tokens: synthesis.input_tokens,
                output_tokens: synthesis.completion_tokens,
                tokens_used: synthesis.tokens_used,
                cost_usd: pricing::cost_for_tokens(model, synthesis.tokens_used),
                duration_ms: 0,
            });
        }
    }

    let cost_usd = agent_usages.iter().map(|u| u.cost_usd).sum();

    AggregatedUsage {
        model_used: model_used.to_string(),
        provider,
        input_tokens,
        output_tokens,
        total_tokens,
        cost_usd,
        agent_usages,
    }
}

fn most_frequent<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for value in values {
        let entry = counts.entry(value).or_insert(0);
        if *entry == 0 {
            order.push(value);
        }
        *entry += 1;
    }
    // First-seen wins ties so the result is deterministic.
    order.into_iter().max_by_key(|v| counts[v])
}

/// Extract a numeric value from free text.
///
/// Tries a direct parse first; otherwise scans whitespace tokens (with edge
/// punctuation stripped), preferring the number right after an "equals"/"is"
/// and falling back to the last numeric token.
pub fn parse_numeric_value(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if let Ok(value) = trimmed.parse::<f64>() {
        return Some(value);
    }

    let tokens: Vec<&str> = trimmed
        .split_whitespace()
        .map(|t| t.trim_matches(|c| ".,!?:;".contains(c)))
        .collect();

    let mut last_numeric = None;
    for (i, token) in tokens.iter().enumerate() {
        if token.eq_ignore_ascii_case("equals") || token.eq_ignore_ascii_case("is") {
            if let Some(next) = tokens.get(i + 1) {
                if let Ok(value) = next.parse::<f64>() {
                    return Some(value);
                }
            }
        }
        if let Ok(value) = token.parse::<f64>() {
            last_numeric = Some(value);
        }
    }
    last_numeric
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str, model: &str, provider: &str, total: u64, success: bool) -> AgentExecutionResult {
        AgentExecutionResult {
            agent_id: id.to_string(),
            model_used: model.to_string(),
            provider: provider.to_string(),
            tokens_used: total,
            success,
            ..Default::default()
        }
    }

    #[test]
    fn empty_aggregation_is_identity() {
        assert_eq!(aggregate_agent_metadata(&[], None), AggregatedUsage::default());
    }

    #[test]
    fn primary_model_is_most_frequent_successful() {
        let results = vec![
            agent("a1", "claude-sonnet-4", "anthropic", 100, true),
            agent("a2", "claude-sonnet-4", "anthropic", 100, true),
            agent("a3", "gpt-5", "openai", 100, true),
            agent("a4", "gpt-5", "openai", 100, false),
        ];
        let usage = aggregate_agent_metadata(&results, None);
        assert_eq!(usage.model_used, "claude-sonnet-4");
        assert_eq!(usage.provider, "anthropic");
        assert_eq!(usage.total_tokens, 400);
        assert_eq!(usage.agent_usages.len(), 4);
    }

    #[test]
    fn provider_detected_from_model_when_missing() {
        let results = vec![agent("a1", "gpt-5", "", 50, true)];
        let usage = aggregate_agent_metadata(&results, None);
        assert_eq!(usage.provider, "openai");
    }

    #[test]
    fn synthesis_tokens_are_added() {
        let results = vec![agent("a1", "claude-sonnet-4", "anthropic", 30, true)];
        let synthesis = SynthesisOutput {
            final_result: "combined".into(),
            tokens_used: 30,
            model_used: "claude-sonnet-4".into(),
            provider: "anthropic".into(),
            ..Default::default()
        };
        let usage = aggregate_agent_metadata(&results, Some(&synthesis));
        assert_eq!(usage.total_tokens, 60);
        assert_eq!(usage.agent_usages.last().unwrap().agent_id, "synthesis");
    }

    #[test]
    fn parse_numeric_direct() {
        assert_eq!(parse_numeric_value("200.0"), Some(200.0));
        assert_eq!(parse_numeric_value("  -3.5 "), Some(-3.5));
    }

    #[test]
    fn parse_numeric_prefers_equals() {
        assert_eq!(
            parse_numeric_value("50 times 4 equals 200, then add 100"),
            Some(200.0)
        );
        assert_eq!(parse_numeric_value("The answer is 42."), Some(42.0));
    }

    #[test]
    fn parse_numeric_falls_back_to_last_number() {
        assert_eq!(
            parse_numeric_value("First we get 10, then 20, finally 30."),
            Some(30.0)
        );
        assert_eq!(parse_numeric_value("no numbers here"), None);
    }
}
