//! Strategy workflows: the coordination patterns a routed task can run.

pub mod browser;
pub mod dag;
pub mod react;
pub mod simple;
pub mod subtask;
pub mod supervisor;
pub mod template;

use std::sync::atomic::Ordering;

use serde_json::{Value, json};
use tracing::{info, warn};

use troupe_models::{
    AgentExecutionResult, DecompositionResult, TaskInput, TaskMetadata, TaskResult, UsagePhase,
};
use troupe_traits::{SynthesisOutput, SynthesisRequest};

use crate::citations::{CitationCollector, filter_fetch_only_and_assign_ids};
use crate::error::Result;
use troupe_telemetry::EventType;
use crate::metadata::aggregate_agent_metadata;
use crate::retry::with_retries;
use crate::runtime::WorkflowCtx;
use crate::synthesis;

/// The coordination patterns the router can delegate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Simple,
    Dag,
    Supervisor,
    React,
    Research,
    Scientific,
    Exploratory,
    BrowserUse,
    Template,
}

impl StrategyKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "simple" => Some(Self::Simple),
            "dag" => Some(Self::Dag),
            "supervisor" => Some(Self::Supervisor),
            "react" => Some(Self::React),
            "research" => Some(Self::Research),
            "scientific" => Some(Self::Scientific),
            "exploratory" => Some(Self::Exploratory),
            "browser_use" => Some(Self::BrowserUse),
            "template" => Some(Self::Template),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Dag => "dag",
            Self::Supervisor => "supervisor",
            Self::React => "react",
            Self::Research => "research",
            Self::Scientific => "scientific",
            Self::Exploratory => "exploratory",
            Self::BrowserUse => "browser_use",
            Self::Template => "template",
        }
    }
}

/// Shared tail of the fan-out strategies: collect citations, synthesize (or
/// bypass), reflect, and assemble the result with full usage rollups.
pub(crate) async fn finalize_fleet_results(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    plan: &DecompositionResult,
    results: Vec<AgentExecutionResult>,
    route: StrategyKind,
    synth_phase: UsagePhase,
) -> Result<TaskResult> {
    let collector = CitationCollector::new(ctx.config.citations.clone());
    let (citations, citation_stats) = collector.collect(&results);
    ctx.metrics
        .citations_collected
        .fetch_add(citations.len() as u64, Ordering::Relaxed);

    let successes = results.iter().filter(|r| r.success).count();
    if successes == 0 {
        let mut result = TaskResult::failed("all subtasks failed").with_route(route.name());
        result.metadata.tool_errors = collect_tool_errors(&results);
        result.metadata.agent_usages = aggregate_agent_metadata(&results, None).agent_usages;
        return Ok(result);
    }

    let mut synthesis_output: Option<SynthesisOutput> = None;
    let final_text;

    if synthesis::can_bypass_synthesis(&results, input.bypass_single_result, citations.len()) {
        info!("Single clean result, bypassing synthesis");
        final_text = results
            .iter()
            .find(|r| r.success)
            .map(|r| r.response.clone())
            .unwrap_or_default();
    } else {
        let research = !input.context.routing.research_areas.is_empty();
        let context =
            synthesis::build_synthesis_context(&input.context.to_value(), research, &citations);
        let request = SynthesisRequest {
            query: input.query.clone(),
            agent_results: results.clone(),
            context,
            collected_citations: citations.clone(),
            parent_workflow_id: Some(ctx.workflow_id.clone()),
        };

        let synthesizer = ctx.activities.synthesizer.clone();
        let retried = request.clone();
        let output = with_retries("synthesize", 3, move || {
            let synthesizer = synthesizer.clone();
            let request = retried.clone();
            async move { synthesizer.synthesize(request).await }
        })
        .await?;

        ctx.record_usage(
            "synthesis",
            &output.model_used,
            &output.provider,
            output.input_tokens,
            output.completion_tokens,
            synth_phase,
            input.user_id.as_deref(),
            input.session_id.as_deref(),
        )
        .await;

        let reflection = synthesis::run_reflection(
            &ctx.activities,
            &ctx.config.reflection,
            &input.query,
            request,
            output,
        )
        .await?;
        if reflection.reflection_tokens > 0 {
            ctx.record_usage(
                "reflection",
                &reflection.output.model_used,
                &reflection.output.provider,
                0,
                reflection.reflection_tokens,
                UsagePhase::ReflectionSynth,
                input.user_id.as_deref(),
                input.session_id.as_deref(),
            )
            .await;
        }

        let mut text = reflection.output.final_result.clone();
        if !citations.is_empty() {
            text = synthesis::format_report_with_citations(&text, &citations);
        }
        final_text = text;
        synthesis_output = Some(reflection.output);
    }

    ctx.emitter
        .emit(EventType::LlmOutput, crate::synthesis::preview(&final_text))
        .await;

    // Optional claim verification against fetch-derived sources only.
    let mut verification = None;
    if input.context.verification.enable_verification && !citations.is_empty() {
        let fetch_only = filter_fetch_only_and_assign_ids(&citations);
        if !fetch_only.is_empty() {
            match ctx
                .activities
                .synthesizer
                .verify_claims(&input.query, &final_text, &fetch_only)
                .await
            {
                Ok(report) => {
                    verification = Some(json!({
                        "verified": report.verified,
                        "notes": report.notes,
                        "sources_checked": fetch_only.len(),
                    }));
                }
                Err(error) => warn!(error = %error, "Claim verification failed"),
            }
        }
    }

    let usage = aggregate_agent_metadata(&results, synthesis_output.as_ref());
    let mut metadata = TaskMetadata {
        route: Some(route.name().to_string()),
        model_used: (!usage.model_used.is_empty()).then(|| usage.model_used.clone()),
        provider: (!usage.provider.is_empty()).then(|| usage.provider.clone()),
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cost_usd: Some(usage.cost_usd),
        agent_usages: usage.agent_usages,
        citations,
        citation_stats: Some(citation_stats),
        tool_errors: collect_tool_errors(&results),
        ..Default::default()
    };
    metadata.insert_extra(
        "subtask_count",
        Value::Number(plan.subtasks.len().into()),
    );
    if let Some(verification) = verification {
        metadata.insert_extra("verification", verification);
    }

    Ok(TaskResult {
        success: true,
        result: final_text,
        error_message: None,
        tokens_used: usage.total_tokens,
        metadata,
    })
}

fn collect_tool_errors(results: &[AgentExecutionResult]) -> Vec<String> {
    results
        .iter()
        .flat_map(|r| r.tool_executions.iter())
        .filter(|t| !t.success)
        .filter_map(|t| {
            t.error
                .as_ref()
                .map(|error| format!("{}: {error}", t.tool))
        })
        .collect()
}
