//! Browser-use loop: one unified agent per iteration driving a browser tool.

use tracing::{debug, info, warn};

use troupe_models::{
    AgentExecutionResult, DecompositionResult, Subtask, TaskInput, TaskResult, UsagePhase,
};
use troupe_telemetry::EventType;
use troupe_traits::{ActivityError, AgentExecutionRequest};

use crate::error::{EngineError, Result};
use crate::retry::with_retries;
use crate::runtime::{WorkflowCtx, checkpoints};
use crate::strategies::react::{
    WindowLog, citations_stable, mentions_completion, mentions_high_confidence,
    observations_similar,
};
use crate::strategies::{StrategyKind, finalize_fleet_results};

/// Placeholder for screenshots in the LLM-facing observation log.
const SCREENSHOT_PLACEHOLDER: &str = "[screenshot omitted from context]";

/// Run the browser-use loop.
///
/// Unlike the split ReAct loop, each iteration is one unified agent call that
/// reasons and acts in the same turn, pinned to the medium model tier.
/// Screenshots are truncated out of the LLM context but forwarded verbatim
/// as event payloads.
pub async fn run_browser(ctx: &WorkflowCtx, input: &TaskInput) -> Result<TaskResult> {
    ctx.emitter
        .emit(EventType::WorkflowStarted, "browser-use loop started")
        .await;

    let config = &ctx.config.loops;
    let mut input = input.clone();
    input.context.model.model_tier = Some("medium".to_string());
    if !input.suggested_tools.iter().any(|t| t == "browser") {
        input.suggested_tools.push("browser".to_string());
    }

    let mut observations = WindowLog::new(config.observation_window);
    let mut step_results: Vec<AgentExecutionResult> = Vec::new();

    for iteration in 1..=config.browser_max_iterations {
        ctx.checkpoint(checkpoints::PRE_EXECUTION).await?;
        debug!(iteration, "Browser iteration");

        let prompt = format!(
            "Task: {}\n\nObservations so far:\n{}\n\nDecide and perform the next single \
             browser action (navigate, click, type, extract). Report what you did and \
             what you saw, in the same language as the task.",
            input.query,
            observations.render().join("\n")
        );

        let request = AgentExecutionRequest {
            query: prompt,
            agent_id: format!("browser-{iteration}"),
            context: input.context.to_value(),
            mode: input.mode.clone(),
            session_id: input.session_id.clone(),
            history: Vec::new(),
            suggested_tools: input.suggested_tools.clone(),
            tool_parameters: input.tool_parameters.clone(),
            parent_workflow_id: Some(ctx.workflow_id.clone()),
            role: Some("browser_use".to_string()),
        };

        let agents = ctx.activities.agents.clone();
        let retried = request.clone();
        let outcome = with_retries("execute_agent", 3, move || {
            let agents = agents.clone();
            let request = retried.clone();
            async move { agents.execute_agent(request).await }
        })
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(ActivityError::Cancelled) => {
                return Err(EngineError::Activity(ActivityError::Cancelled));
            }
            Err(error) => {
                warn!(iteration, error = %error, "Browser agent call failed, ending loop");
                break;
            }
        };

        let (input_tokens, output_tokens) = result.token_split();
        ctx.record_usage(
            &result.agent_id,
            &result.model_used,
            &result.provider,
            input_tokens,
            output_tokens,
            UsagePhase::ReactAction,
            input.user_id.as_deref(),
            input.session_id.as_deref(),
        )
        .await;

        forward_screenshots(ctx, &result).await;

        if !result.success {
            observations.push(format!(
                "Action failed: {}",
                result.error.clone().unwrap_or_default()
            ));
            step_results.push(result);
            continue;
        }

        let observation: String = sanitize_screenshots(&result.response)
            .chars()
            .take(config.observation_cap_chars)
            .collect();
        observations.push(observation);

        let response = result.response.clone();
        step_results.push(result);

        if mentions_completion(&response) {
            info!(iteration, "Browser agent declared completion");
            break;
        }
        if iteration >= 2 {
            if let Some(last) = observations.last() {
                if mentions_high_confidence(last) {
                    info!(iteration, "High-confidence browser observation, stopping early");
                    break;
                }
            }
            if let Some((previous, last)) = observations.last_two() {
                if observations_similar(previous, last) || citations_stable(previous, last) {
                    info!(iteration, "Browser observations converged, stopping early");
                    break;
                }
            }
        }
    }

    let plan = DecompositionResult {
        subtasks: step_results
            .iter()
            .enumerate()
            .map(|(i, _)| Subtask::new(format!("browse-{}", i + 1), ""))
            .collect(),
        ..Default::default()
    };
    finalize_fleet_results(
        ctx,
        &input,
        &plan,
        step_results,
        StrategyKind::BrowserUse,
        UsagePhase::ReactSynth,
    )
    .await
}

/// Forward raw screenshots from tool output as event payloads.
async fn forward_screenshots(ctx: &WorkflowCtx, result: &AgentExecutionResult) {
    for execution in &result.tool_executions {
        let Some(screenshot) = execution.output.get("screenshot") else {
            continue;
        };
        ctx.emitter
            .emit_with_payload(
                EventType::DataProcessing,
                "browser screenshot",
                serde_json::json!({
                    "agent_id": result.agent_id,
                    "tool": execution.tool,
                    "screenshot": screenshot,
                }),
            )
            .await;
    }
}

/// Replace inline base64 screenshot payloads with a short placeholder.
fn sanitize_screenshots(response: &str) -> String {
    const MARKER: &str = "data:image/";
    if !response.contains(MARKER) {
        return response.to_string();
    }
    let mut out = String::with_capacity(response.len());
    let mut rest = response;
    while let Some(start) = rest.find(MARKER) {
        out.push_str(&rest[..start]);
        out.push_str(SCREENSHOT_PLACEHOLDER);
        let tail = &rest[start..];
        let end = tail
            .find(|c: char| c.is_whitespace() || c == '"' || c == ')')
            .unwrap_or(tail.len());
        rest = &tail[end..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screenshots_are_replaced_in_context() {
        let response = "Navigated. ![shot](data:image/png;base64,AAAA) Page shows a login.";
        let sanitized = sanitize_screenshots(response);
        assert!(!sanitized.contains("base64"));
        assert!(sanitized.contains(SCREENSHOT_PLACEHOLDER));
        assert!(sanitized.contains("Page shows a login."));
    }

    #[test]
    fn plain_responses_pass_through() {
        let response = "Clicked the first result.";
        assert_eq!(sanitize_screenshots(response), response);
    }

    #[test]
    fn screenshot_payloads_are_detected() {
        let value = serde_json::json!({"screenshot": "iVBORw0KGgo"});
        assert!(value.get("screenshot").is_some());
    }
}
