//! Simple strategy: one agent, one shot, optional synthesis.

use tracing::{debug, info, warn};

use troupe_models::{TaskInput, TaskMetadata, TaskResult, UsagePhase};
use troupe_telemetry::EventType;
use troupe_traits::{AgentExecutionRequest, SynthesisRequest};

use crate::compression;
use crate::error::Result;
use crate::metadata::aggregate_agent_metadata;
use crate::retry::with_retries;
use crate::runtime::{WorkflowCtx, checkpoints};
use crate::strategies::StrategyKind;

/// Run the single-agent fast path.
pub async fn run_simple(ctx: &WorkflowCtx, input: &TaskInput) -> Result<TaskResult> {
    ctx.emitter
        .emit(EventType::WorkflowStarted, "simple workflow started")
        .await;
    ctx.checkpoint(checkpoints::PRE_EXECUTION).await?;

    let mut input = input.clone();
    fetch_memory(ctx, &mut input).await;

    // Shape oversized history down before it reaches the agent.
    let budget_agent_max = input.context.budget.budget_agent_max.unwrap_or(0);
    match compression::maybe_compress(
        &ctx.activities,
        &ctx.config.compression,
        &input.context.compression,
        budget_agent_max,
        input.session_id.as_deref(),
        &input.history,
    )
    .await
    {
        Ok(Some(outcome)) => {
            info!(
                tokens_used = outcome.tokens_used,
                kept = outcome.shaped_history.len(),
                "History compressed"
            );
            input.context.compression.context_summary = Some(outcome.summary);
            input.history = outcome.shaped_history;
        }
        Ok(None) => {}
        Err(error) => warn!(error = %error, "History compression failed, continuing uncompressed"),
    }

    let agent_id = "agent-simple";
    ctx.emitter
        .emit_agent(EventType::AgentThinking, agent_id, "analyzing request")
        .await;
    ctx.emitter
        .emit_agent(EventType::AgentStarted, agent_id, input.query.clone())
        .await;

    let request = AgentExecutionRequest {
        query: input.query.clone(),
        agent_id: agent_id.to_string(),
        context: input.context.to_value(),
        mode: input.mode.clone(),
        session_id: input.session_id.clone(),
        history: input.history.clone(),
        suggested_tools: input.suggested_tools.clone(),
        tool_parameters: input.tool_parameters.clone(),
        parent_workflow_id: Some(ctx.workflow_id.clone()),
        role: input.context.routing.role.clone(),
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
        agent_id,
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
        ctx.emitter
            .emit_agent(
                EventType::ErrorOccurred,
                agent_id,
                result.error.clone().unwrap_or_default(),
            )
            .await;
        return Ok(
            TaskResult::failed(result.error.clone().unwrap_or_else(|| "agent failed".into()))
                .with_route(StrategyKind::Simple.name()),
        );
    }

    // A structured-looking response or an explicit search hint still goes
    // through synthesis for a user-facing answer.
    let trimmed = result.response.trim_start();
    let needs_synthesis = trimmed.starts_with('{')
        || trimmed.starts_with('[')
        || input.suggested_tools.iter().any(|t| t == "web_search");

    let mut synthesis_output = None;
    let final_text = if needs_synthesis {
        debug!("Simple result needs synthesis");
        let request = SynthesisRequest {
            query: input.query.clone(),
            agent_results: vec![result.clone()],
            context: input.context.to_value(),
            collected_citations: Vec::new(),
            parent_workflow_id: Some(ctx.workflow_id.clone()),
        };
        let synthesizer = ctx.activities.synthesizer.clone();
        let output = with_retries("synthesize", 3, move || {
            let synthesizer = synthesizer.clone();
            let request = request.clone();
            async move { synthesizer.synthesize(request).await }
        })
        .await?;
        ctx.record_usage(
            "synthesis",
            &output.model_used,
            &output.provider,
            output.input_tokens,
            output.completion_tokens,
            UsagePhase::Synthesis,
            input.user_id.as_deref(),
            input.session_id.as_deref(),
        )
        .await;
        let text = output.final_result.clone();
        synthesis_output = Some(output);
        text
    } else {
        result.response.clone()
    };

    if let Some(session_id) = &input.session_id {
        if let Err(error) = ctx
            .activities
            .persistence
            .update_session_result(session_id, &final_text, result.tokens_used)
            .await
        {
            warn!(error = %error, "Failed to update session result");
        }
    }

    ctx.emitter
        .emit_agent(EventType::AgentCompleted, agent_id, "done")
        .await;
    ctx.checkpoint(checkpoints::PRE_COMPLETION).await?;
    ctx.emitter
        .emit(EventType::WorkflowCompleted, "simple workflow completed")
        .await;

    let results = vec![result];
    let usage = aggregate_agent_metadata(&results, synthesis_output.as_ref());
    Ok(TaskResult {
        success: true,
        result: final_text,
        error_message: None,
        tokens_used: usage.total_tokens,
        metadata: TaskMetadata {
            route: Some(StrategyKind::Simple.name().to_string()),
            model_used: (!usage.model_used.is_empty()).then(|| usage.model_used.clone()),
            provider: (!usage.provider.is_empty()).then(|| usage.provider.clone()),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost_usd: Some(usage.cost_usd),
            agent_usages: usage.agent_usages,
            ..Default::default()
        },
    })
}

/// Best-effort memory fetches stashed into the agent context.
async fn fetch_memory(ctx: &WorkflowCtx, input: &mut TaskInput) {
    if let Some(session_id) = &input.session_id {
        match ctx.activities.memory.fetch_session_memory(session_id).await {
            Ok(Some(memory)) => {
                input.context.set_hint("session_memory", memory);
            }
            Ok(None) => {}
            Err(error) => warn!(error = %error, "Session memory fetch failed"),
        }
    }
    if let Some(user_id) = &input.user_id {
        match ctx
            .activities
            .memory
            .fetch_hierarchical_memory(user_id, &input.query)
            .await
        {
            Ok(Some(memory)) => {
                input.context.set_hint("hierarchical_memory", memory);
            }
            Ok(None) => {}
            Err(error) => warn!(error = %error, "Hierarchical memory fetch failed"),
        }
    }
}
