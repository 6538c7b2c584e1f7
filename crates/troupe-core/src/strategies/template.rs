//! Template executor: runs a compiled DAG of heterogeneous nodes.

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use troupe_models::{
    DecompositionResult, ExecutionStrategy, Subtask, TaskInput, TaskMetadata, TaskResult,
    TaskTemplate, TemplateNode, TemplateNodeKind, UsagePhase,
};
use troupe_telemetry::EventType;
use troupe_traits::AgentExecutionRequest;

use crate::error::{EngineError, Result};
use crate::retry::with_retries;
use crate::runtime::{WorkflowCtx, checkpoints};
use crate::strategies::dag::run_dag_with_plan;
use crate::strategies::react::run_react;
use crate::strategies::supervisor::run_supervisor;
use crate::strategies::StrategyKind;
use crate::template::{CompiledTemplate, compile, expand_parallel_by, substitute};

/// Outcome of one template node (or expanded sibling).
struct NodeOutcome {
    output: String,
    tokens: u64,
    summary: Value,
}

/// Execute a template: nodes in topological order, results keyed by node id,
/// the last node's output as the final answer.
pub async fn run_template(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    template: TaskTemplate,
) -> Result<TaskResult> {
    let compiled = compile(&template)?;
    ctx.emitter
        .emit(
            EventType::WorkflowStarted,
            format!(
                "template {} v{} started with {} nodes",
                template.name,
                template.version,
                template.nodes.len()
            ),
        )
        .await;

    let mut node_results: HashMap<String, String> = HashMap::new();
    let mut node_summaries: Vec<Value> = Vec::new();
    let mut total_tokens = 0u64;
    let mut last_output = String::new();

    for &position in &compiled.order {
        ctx.checkpoint(checkpoints::PRE_EXECUTION).await?;
        let node = &compiled.template.nodes[position];
        let siblings = expand_parallel_by(node);
        let expanded = siblings.len() > 1;

        let mut outputs = Vec::with_capacity(siblings.len());
        for sibling in &siblings {
            let outcome = run_node(ctx, input, &compiled, sibling, &node_results).await?;
            total_tokens += outcome.tokens;
            node_results.insert(sibling.id.clone(), outcome.output.clone());
            node_summaries.push(outcome.summary);
            outputs.push(outcome.output);
        }

        let combined = outputs.join("\n\n");
        if expanded {
            node_results.insert(node.id.clone(), combined.clone());
        }
        last_output = combined;
    }

    ctx.checkpoint(checkpoints::PRE_COMPLETION).await?;
    ctx.emitter
        .emit(EventType::WorkflowCompleted, "template workflow completed")
        .await;

    let mut metadata = TaskMetadata {
        route: Some(StrategyKind::Template.name().to_string()),
        ..Default::default()
    };
    metadata.insert_extra("template_name", json!(template.name));
    metadata.insert_extra("template_version", json!(template.version));
    metadata.insert_extra("template_checksum", json!(compiled.checksum));
    metadata.insert_extra("node_results", json!(node_summaries));

    Ok(TaskResult {
        success: true,
        result: last_output,
        error_message: None,
        tokens_used: total_tokens,
        metadata,
    })
}

async fn run_node(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    compiled: &CompiledTemplate,
    node: &TemplateNode,
    node_results: &HashMap<String, String>,
) -> Result<NodeOutcome> {
    let prompt_template = node
        .metadata
        .get("prompt_template")
        .and_then(Value::as_str)
        .unwrap_or(if node.description.is_empty() {
            &input.query
        } else {
            &node.description
        });
    let prompt = substitute(prompt_template, node_results, &node.context);

    match node.kind {
        TemplateNodeKind::Simple => run_simple_node(ctx, input, node, prompt).await,
        TemplateNodeKind::Cognitive => run_cognitive_node(ctx, input, node, prompt).await,
        TemplateNodeKind::Dag => run_dag_node(ctx, input, compiled, node, prompt, node_results).await,
        TemplateNodeKind::Supervisor => run_supervisor_node(ctx, input, node, prompt).await,
    }
}

/// `simple` node: one consolidated agent call with the node's allowlist.
async fn run_simple_node(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    node: &TemplateNode,
    prompt: String,
) -> Result<NodeOutcome> {
    let agent_id = format!("node-{}", node.id);
    let request = AgentExecutionRequest {
        query: prompt,
        agent_id: agent_id.clone(),
        context: input.context.to_value(),
        mode: node.mode.clone().or_else(|| input.mode.clone()),
        session_id: input.session_id.clone(),
        history: Vec::new(),
        suggested_tools: node.tool_allowlist.clone(),
        tool_parameters: Default::default(),
        parent_workflow_id: Some(ctx.workflow_id.clone()),
        role: None,
    };

    let agents = ctx.activities.agents.clone();
    let retried = request.clone();
    let result = with_retries("execute_simple_task", 3, move || {
        let agents = agents.clone();
        let request = retried.clone();
        async move { agents.execute_simple_task(request).await }
    })
    .await?;

    let (input_tokens, output_tokens) = result.token_split();
    ctx.record_usage(
        &agent_id,
        &result.model_used,
        &result.provider,
        input_tokens,
        output_tokens,
        UsagePhase::Agent,
        input.user_id.as_deref(),
        input.session_id.as_deref(),
    )
    .await;

    if !result.success {
        return Err(EngineError::Template(format!(
            "node {} failed: {}",
            node.id,
            result.error.unwrap_or_default()
        )));
    }

    Ok(NodeOutcome {
        tokens: result.tokens_used,
        summary: json!({
            "node_id": node.id,
            "kind": "simple",
            "tokens": result.tokens_used,
            "success": true,
        }),
        output: result.response,
    })
}

/// `cognitive` node: a named strategy, degraded to a cheaper one when the
/// node budget falls below the configured threshold.
async fn run_cognitive_node(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    node: &TemplateNode,
    prompt: String,
) -> Result<NodeOutcome> {
    let requested = node
        .strategy
        .clone()
        .or_else(|| {
            node.metadata
                .get("strategy")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "react".to_string());

    let effective = match node.budget_max {
        Some(budget) => ctx.config.degradation.resolve(&requested, budget),
        None => requested.clone(),
    };
    let degraded = effective != requested;
    if degraded {
        info!(from = %requested, to = %effective, "Cognitive strategy degraded by budget");
        ctx.metrics
            .strategy_degradations
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    let mut node_input = input.clone();
    node_input.query = prompt.clone();
    node_input.suggested_tools = node.tool_allowlist.clone();
    if let Some(budget) = node.budget_max {
        node_input.context.budget.budget_agent_max = Some(budget);
    }

    let (output, tokens) = match StrategyKind::parse(&effective) {
        Some(
            kind @ (StrategyKind::React
            | StrategyKind::Research
            | StrategyKind::Scientific
            | StrategyKind::Exploratory),
        ) => {
            let result = run_react(ctx, &node_input, kind).await?;
            if !result.success {
                return Err(EngineError::Template(format!(
                    "node {} failed: {}",
                    node.id,
                    result.error_message.unwrap_or_default()
                )));
            }
            (result.result, result.tokens_used)
        }
        // Direct and chain-of-thought shapes collapse into one agent call.
        _ => {
            let outcome = run_simple_node(ctx, input, node, prompt).await?;
            (outcome.output, outcome.tokens)
        }
    };

    let mut summary = Map::new();
    summary.insert("node_id".to_string(), json!(node.id));
    summary.insert("kind".to_string(), json!("cognitive"));
    summary.insert("strategy".to_string(), json!(effective));
    summary.insert("tokens".to_string(), json!(tokens));
    if degraded {
        summary.insert("degraded_from".to_string(), json!(requested));
        summary.insert("degraded_to".to_string(), json!(effective));
    }

    Ok(NodeOutcome {
        output,
        tokens,
        summary: Value::Object(summary),
    })
}

/// `dag` node: aggregate dependency outputs verbatim, or run an inline
/// hybrid task list from `metadata.tasks`.
async fn run_dag_node(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    _compiled: &CompiledTemplate,
    node: &TemplateNode,
    prompt: String,
    node_results: &HashMap<String, String>,
) -> Result<NodeOutcome> {
    let Some(tasks) = node.metadata.get("tasks") else {
        // No inline tasks: this node is a join point over its dependencies.
        let aggregated: Vec<&str> = node
            .depends_on
            .iter()
            .filter_map(|dep| node_results.get(dep).map(String::as_str))
            .collect();
        let output = aggregated.join("\n\n");
        return Ok(NodeOutcome {
            summary: json!({
                "node_id": node.id,
                "kind": "dag",
                "aggregated": node.depends_on.len(),
            }),
            tokens: 0,
            output,
        });
    };

    let subtasks: Vec<Subtask> = serde_json::from_value(tasks.clone())
        .map_err(|e| EngineError::Template(format!("node {}: invalid tasks: {e}", node.id)))?;
    let plan = DecompositionResult {
        execution_strategy: ExecutionStrategy::Hybrid,
        subtasks,
        ..Default::default()
    };

    let mut node_input = input.clone();
    node_input.query = prompt;
    node_input.suggested_tools = node.tool_allowlist.clone();

    let result = run_dag_with_plan(ctx, &node_input, &plan, StrategyKind::Dag).await?;
    if !result.success {
        return Err(EngineError::Template(format!(
            "node {} failed: {}",
            node.id,
            result.error_message.unwrap_or_default()
        )));
    }

    Ok(NodeOutcome {
        summary: json!({
            "node_id": node.id,
            "kind": "dag",
            "subtasks": plan.subtasks.len(),
            "tokens": result.tokens_used,
        }),
        tokens: result.tokens_used,
        output: result.result,
    })
}

/// `supervisor` node: a child supervisor workflow over the node's task list.
async fn run_supervisor_node(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    node: &TemplateNode,
    prompt: String,
) -> Result<NodeOutcome> {
    let subtasks: Vec<Subtask> = match node.metadata.get("tasks") {
        Some(tasks) => serde_json::from_value(tasks.clone())
            .map_err(|e| EngineError::Template(format!("node {}: invalid tasks: {e}", node.id)))?,
        None => vec![Subtask::new("task-1", prompt.clone())],
    };

    let mut child_input = input.clone();
    child_input.query = prompt;
    child_input.suggested_tools = node.tool_allowlist.clone();
    child_input.parent_workflow_id = Some(ctx.workflow_id.clone());
    child_input.preplanned_decomposition = Some(DecompositionResult {
        execution_strategy: ExecutionStrategy::Sequential,
        subtasks,
        ..Default::default()
    });
    if let Some(mode) = &node.mode {
        child_input.mode = Some(mode.clone());
    }
    if let Some(require_approval) = node.require_approval {
        child_input.require_approval = Some(require_approval);
    }

    let child = ctx.child();
    let outcome = run_supervisor(&child, &child_input).await;
    ctx.finish_child(&child);
    let result = outcome?;

    if !result.success {
        warn!(node_id = %node.id, "Supervisor node failed");
        return Err(EngineError::Template(format!(
            "node {} failed: {}",
            node.id,
            result.error_message.unwrap_or_default()
        )));
    }

    Ok(NodeOutcome {
        summary: json!({
            "node_id": node.id,
            "kind": "supervisor",
            "child_workflow_id": child.workflow_id,
            "tokens": result.tokens_used,
        }),
        tokens: result.tokens_used,
        output: result.result,
    })
}
