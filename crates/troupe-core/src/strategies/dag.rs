//! DAG strategy: fan-out subtasks with dependency propagation.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tracing::{info, warn};

use troupe_models::{
    AgentExecutionResult, DecompositionResult, ExecutionStrategy, TaskInput, TaskResult,
    UsagePhase,
};
use troupe_telemetry::EventType;

use crate::error::{EngineError, Result};
use crate::runtime::{TopicBoard, WorkflowCtx, checkpoints};
use crate::strategies::subtask::run_subtask;
use crate::strategies::{StrategyKind, finalize_fleet_results};

/// Run the fan-out/fan-in strategy over a decomposition plan.
pub async fn run_dag(ctx: &WorkflowCtx, input: &TaskInput) -> Result<TaskResult> {
    let plan = plan_from_input(input)?;
    run_dag_with_plan(ctx, input, &plan, StrategyKind::Dag).await
}

pub(crate) fn plan_from_input(input: &TaskInput) -> Result<DecompositionResult> {
    let plan = input
        .preplanned_decomposition
        .clone()
        .ok_or_else(|| EngineError::Validation("strategy requires a decomposition".into()))?;
    plan.validate().map_err(EngineError::Validation)?;
    if plan.subtasks.is_empty() {
        return Err(EngineError::Validation("decomposition has no subtasks".into()));
    }
    Ok(plan)
}

pub(crate) async fn run_dag_with_plan(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    plan: &DecompositionResult,
    route: StrategyKind,
) -> Result<TaskResult> {
    ctx.emitter
        .emit(
            EventType::WorkflowStarted,
            format!("{} workflow started with {} subtasks", route.name(), plan.subtasks.len()),
        )
        .await;

    let board = Arc::new(TopicBoard::new(
        ctx.workflow_id.clone(),
        ctx.activities.workspace.clone(),
        plan.produced_topics(),
        ctx.config.p2p.clone(),
    ));

    let results = match plan.execution_strategy {
        ExecutionStrategy::Parallel | ExecutionStrategy::Hybrid => {
            execute_fan_out(ctx, input, plan, &board).await?
        }
        ExecutionStrategy::Sequential | ExecutionStrategy::Dag => {
            execute_in_order(ctx, input, plan, &board).await?
        }
    };

    // Majority failure aborts instead of synthesizing noise.
    let failures = results.iter().filter(|r| !r.success).count();
    let abort_threshold = plan.subtasks.len() / 2 + 1;
    if failures > abort_threshold {
        warn!(failures, abort_threshold, "Aborting: too many failed subtasks");
        return Ok(TaskResult::failed(format!(
            "{failures} of {} subtasks failed, aborting",
            plan.subtasks.len()
        ))
        .with_route(route.name()));
    }

    ctx.checkpoint(checkpoints::PRE_COMPLETION).await?;
    let result =
        finalize_fleet_results(ctx, input, plan, results, route, UsagePhase::Synthesis).await?;
    ctx.emitter
        .emit(EventType::WorkflowCompleted, format!("{} workflow completed", route.name()))
        .await;
    Ok(result)
}

/// Sequential execution in plan order, propagating dependency outputs.
async fn execute_in_order(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    plan: &DecompositionResult,
    board: &Arc<TopicBoard>,
) -> Result<Vec<AgentExecutionResult>> {
    let mut completed: HashMap<String, AgentExecutionResult> = HashMap::new();
    let mut results = Vec::with_capacity(plan.subtasks.len());

    for index in 0..plan.subtasks.len() {
        ctx.checkpoint(checkpoints::PRE_EXECUTION).await?;
        let result =
            run_subtask(ctx, input, plan, index, &completed, Some(board), false).await?;
        completed.insert(plan.subtasks[index].id.clone(), result.clone());
        results.push(result);
    }

    Ok(results)
}

/// Concurrent execution in dependency waves.
///
/// Parallel plans run everything at once; hybrid plans run each dependency
/// level concurrently, so completed outputs still flow downstream. The
/// in-flight set is bounded by `max_concurrency` (default: subtask count).
async fn execute_fan_out(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    plan: &DecompositionResult,
    board: &Arc<TopicBoard>,
) -> Result<Vec<AgentExecutionResult>> {
    let waves = if plan.execution_strategy == ExecutionStrategy::Parallel {
        vec![(0..plan.subtasks.len()).collect::<Vec<_>>()]
    } else {
        dependency_waves(plan)
    };
    let max_concurrency = plan.subtasks.len().max(1);

    let mut completed: HashMap<String, AgentExecutionResult> = HashMap::new();
    let mut results: Vec<Option<AgentExecutionResult>> = vec![None; plan.subtasks.len()];

    for wave in waves {
        ctx.checkpoint(checkpoints::PRE_EXECUTION).await?;
        info!(wave_size = wave.len(), "Launching subtask wave");

        let mut in_flight = FuturesUnordered::new();
        let mut pending = wave.into_iter();
        let completed_snapshot = completed.clone();

        loop {
            while in_flight.len() < max_concurrency {
                let Some(index) = pending.next() else {
                    break;
                };
                let snapshot = completed_snapshot.clone();
                let board = board.clone();
                in_flight.push(async move {
                    let result =
                        run_subtask(ctx, input, plan, index, &snapshot, Some(&board), false)
                            .await;
                    (index, result)
                });
            }

            let Some((index, result)) = in_flight.next().await else {
                break;
            };
            let result = result?;
            completed.insert(plan.subtasks[index].id.clone(), result.clone());
            results[index] = Some(result);
        }
    }

    Ok(results.into_iter().flatten().collect())
}

/// Topological levels: a subtask's wave is one past its deepest dependency.
fn dependency_waves(plan: &DecompositionResult) -> Vec<Vec<usize>> {
    let index_of: HashMap<&str, usize> = plan
        .subtasks
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut level = vec![0usize; plan.subtasks.len()];
    // Plans validate as acyclic, so n passes reach a fixpoint.
    for _ in 0..plan.subtasks.len() {
        for (i, subtask) in plan.subtasks.iter().enumerate() {
            let depth = subtask
                .dependencies
                .iter()
                .filter_map(|dep| index_of.get(dep.as_str()))
                .map(|&dep_index| level[dep_index] + 1)
                .max()
                .unwrap_or(0);
            level[i] = depth;
        }
    }

    let max_level = level.iter().copied().max().unwrap_or(0);
    let mut waves = vec![Vec::new(); max_level + 1];
    for (i, &l) in level.iter().enumerate() {
        waves[l].push(i);
    }
    waves.retain(|wave| !wave.is_empty());
    waves
}
