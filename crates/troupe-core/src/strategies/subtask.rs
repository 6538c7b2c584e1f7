//! Single-subtask execution shared by the DAG and supervisor strategies.

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use tracing::warn;

use troupe_models::{AgentExecutionResult, DecompositionResult, Subtask, TaskInput};
use troupe_telemetry::EventType;
use troupe_traits::{AgentExecutionRequest, AgentPerformanceRecord};

use crate::budget;
use crate::error::Result;
use crate::metadata::parse_numeric_value;
use crate::runtime::{TopicBoard, WorkflowCtx};

/// Characters of a response forwarded to workspace topics.
const PRODUCE_SUMMARY_CHARS: usize = 500;

/// Execute one planned subtask.
///
/// Injects dependency outputs as `previous_results` (with extracted numeric
/// values), clears stale tool parameters on dependent subtasks, optionally
/// waits on consumed topics, and publishes produced topics on success.
/// Activity failures surface as a `success=false` result, never an error.
pub async fn run_subtask(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    plan: &DecompositionResult,
    index: usize,
    completed: &HashMap<String, AgentExecutionResult>,
    board: Option<&TopicBoard>,
    wait_consumes: bool,
) -> Result<AgentExecutionResult> {
    let subtask = &plan.subtasks[index];
    let agent_id = format!("agent-{}", subtask.id);

    let mut workspace_inputs: Map<String, Value> = Map::new();
    if wait_consumes {
        if let Some(board) = board {
            for topic in &subtask.consumes {
                if let Some(entries) = board.wait_for(topic, &ctx.emitter, &agent_id).await? {
                    let values: Vec<Value> =
                        entries.into_iter().map(|e| e.entry).collect();
                    workspace_inputs.insert(topic.clone(), Value::Array(values));
                }
            }
        }
    }

    let context = build_agent_context(input, subtask, completed, workspace_inputs);

    // Dependent subtasks often carry placeholder parameters like
    // `result_of_task_1`; the real values arrive via previous_results.
    let tool_parameters = if subtask.dependencies.is_empty() {
        subtask.tool_parameters.clone()
    } else {
        Map::new()
    };

    let suggested_tools = if subtask.suggested_tools.is_empty() {
        input.suggested_tools.clone()
    } else {
        subtask.suggested_tools.clone()
    };

    ctx.emitter
        .emit_agent(EventType::AgentStarted, &agent_id, subtask.description.clone())
        .await;

    let request = AgentExecutionRequest {
        query: subtask.description.clone(),
        agent_id: agent_id.clone(),
        context,
        mode: input.mode.clone(),
        session_id: input.session_id.clone(),
        history: input.history.clone(),
        suggested_tools,
        tool_parameters,
        parent_workflow_id: Some(ctx.workflow_id.clone()),
        role: plan.role_for(index).map(str::to_string),
    };

    let budget_agent_max = input.context.budget.budget_agent_max.unwrap_or(0);
    let result = budget::execute_agent(
        ctx,
        request,
        budget_agent_max,
        input.context.model.model_tier.as_deref(),
        input.user_id.as_deref(),
        input.session_id.as_deref(),
    )
    .await?;

    if result.success {
        ctx.emitter
            .emit_agent(
                EventType::AgentCompleted,
                &agent_id,
                format!("completed in {}ms", result.duration_ms),
            )
            .await;
    } else {
        ctx.emitter
            .emit_agent(
                EventType::ErrorOccurred,
                &agent_id,
                result.error.clone().unwrap_or_default(),
            )
            .await;
    }

    if let Err(error) = ctx
        .activities
        .persistence
        .record_agent_performance(AgentPerformanceRecord {
            agent_id: agent_id.clone(),
            success: result.success,
            tokens_used: result.tokens_used,
            duration_ms: result.duration_ms,
            mode: input.mode.clone().unwrap_or_default(),
        })
        .await
    {
        warn!(agent_id = %agent_id, error = %error, "Failed to record agent performance");
    }

    // Standalone persistence is best-effort and never fails the subtask.
    if let Err(error) = ctx
        .activities
        .persistence
        .persist_agent_execution(&ctx.workflow_id, &result)
        .await
    {
        warn!(agent_id = %agent_id, error = %error, "Failed to persist agent execution");
    }
    for execution in &result.tool_executions {
        if let Err(error) = ctx
            .activities
            .persistence
            .persist_tool_execution(&ctx.workflow_id, &agent_id, execution)
            .await
        {
            warn!(tool = %execution.tool, error = %error, "Failed to persist tool execution");
        }
    }

    ctx.emitter
        .emit_agent(
            EventType::Progress,
            &agent_id,
            format!("subtask {} finished", subtask.id),
        )
        .await;

    if result.success {
        if let Some(board) = board {
            publish_produced_topics(board, subtask, &result).await;
        }
    }

    Ok(result)
}

/// Agent context: the request context plus dependency outputs.
fn build_agent_context(
    input: &TaskInput,
    subtask: &Subtask,
    completed: &HashMap<String, AgentExecutionResult>,
    workspace_inputs: Map<String, Value>,
) -> Value {
    let mut map = match input.context.to_value() {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let mut previous = Map::new();
    for dep in &subtask.dependencies {
        let Some(result) = completed.get(dep) else {
            continue;
        };
        let mut entry = Map::new();
        entry.insert("response".to_string(), json!(result.response));
        entry.insert("tokens".to_string(), json!(result.tokens_used));
        entry.insert("success".to_string(), json!(result.success));
        if let Some(value) = parse_numeric_value(&result.response) {
            entry.insert("numeric_value".to_string(), json!(value));
        }
        previous.insert(dep.clone(), Value::Object(entry));
    }
    if !previous.is_empty() {
        map.insert("previous_results".to_string(), Value::Object(previous));
    }

    if !workspace_inputs.is_empty() {
        map.insert("workspace".to_string(), Value::Object(workspace_inputs));
    }

    Value::Object(map)
}

async fn publish_produced_topics(
    board: &TopicBoard,
    subtask: &Subtask,
    result: &AgentExecutionResult,
) {
    for topic in &subtask.produces {
        let summary: String = result
            .response
            .chars()
            .take(PRODUCE_SUMMARY_CHARS)
            .collect();
        let entry = json!({
            "subtask_id": subtask.id,
            "summary": summary,
            "tokens": result.tokens_used,
        });
        if let Err(error) = board.publish(topic, entry).await {
            warn!(topic, error = %error, "Failed to publish workspace entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_outputs_carry_numeric_values() {
        let input = TaskInput::new("chain");
        let mut subtask = Subtask::new("task-2", "add 100");
        subtask.dependencies = vec!["task-1".to_string()];

        let mut completed = HashMap::new();
        completed.insert(
            "task-1".to_string(),
            AgentExecutionResult {
                agent_id: "agent-task-1".into(),
                response: "200.0".into(),
                success: true,
                tokens_used: 12,
                ..Default::default()
            },
        );

        let context = build_agent_context(&input, &subtask, &completed, Map::new());
        let previous = &context["previous_results"]["task-1"];
        assert_eq!(previous["response"], "200.0");
        assert_eq!(previous["numeric_value"], 200.0);
        assert_eq!(previous["success"], true);
    }

    #[test]
    fn missing_dependencies_are_skipped() {
        let input = TaskInput::new("chain");
        let mut subtask = Subtask::new("task-2", "later");
        subtask.dependencies = vec!["ghost".to_string()];
        let context = build_agent_context(&input, &subtask, &HashMap::new(), Map::new());
        assert!(context.get("previous_results").is_none());
    }
}
