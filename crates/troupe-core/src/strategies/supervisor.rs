//! Supervisor strategy: hierarchical coordination with peer-to-peer
//! dependency passing, a mailbox, and a dynamic team.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::{Value, json};
use tracing::{info, warn};

use troupe_models::{
    AgentExecutionResult, DecompositionResult, ExecutionStrategy, TaskInput, TaskResult,
    UsagePhase,
};
use troupe_telemetry::EventType;
use troupe_traits::TeamChange;

use crate::error::Result;
use crate::runtime::{Mailbox, MailboxMessage, TeamRoster, TopicBoard, WorkflowCtx, checkpoints};
use crate::strategies::dag::plan_from_input;
use crate::strategies::subtask::run_subtask;
use crate::strategies::{StrategyKind, finalize_fleet_results, simple};

/// Signal channel names handled by the supervisor.
const MAILBOX_CHANNEL: &str = "mailbox_v1";
const RECRUIT_CHANNEL: &str = "recruit_v1";
const RETIRE_CHANNEL: &str = "retire_v1";

/// Run the supervisor strategy over a decomposition plan.
pub async fn run_supervisor(ctx: &WorkflowCtx, input: &TaskInput) -> Result<TaskResult> {
    let mut plan = plan_from_input(input)?;

    ctx.emitter
        .emit(
            EventType::WorkflowStarted,
            format!("supervisor workflow started with {} subtasks", plan.subtasks.len()),
        )
        .await;

    let mailbox = Arc::new(Mailbox::new());
    let roster = Arc::new(TeamRoster::new());
    register_queries(ctx, &mailbox, &roster);

    let mailbox_task = spawn_mailbox_forwarder(ctx, &mailbox);
    let recruit_task = spawn_recruit_listener(ctx, input, &roster, &mailbox);
    let retire_task = spawn_retire_listener(ctx, &roster);

    advise_decomposition(ctx, input, &mut plan).await;

    let board = Arc::new(TopicBoard::new(
        ctx.workflow_id.clone(),
        ctx.activities.workspace.clone(),
        plan.produced_topics(),
        ctx.config.p2p.clone(),
    ));

    let outcome = execute_plan(ctx, input, &plan, &board).await;

    // The team listeners die with the workflow.
    mailbox_task.abort();
    recruit_task.abort();
    retire_task.abort();

    let results = outcome?;

    let failures = results.iter().filter(|r| !r.success).count();
    let abort_threshold = plan.subtasks.len() / 2 + 1;
    if failures > abort_threshold {
        warn!(failures, abort_threshold, "Aborting: too many failed subtasks");
        return Ok(TaskResult::failed(format!(
            "{failures} of {} subtasks failed, aborting",
            plan.subtasks.len()
        ))
        .with_route(StrategyKind::Supervisor.name()));
    }

    ctx.checkpoint(checkpoints::PRE_COMPLETION).await?;
    ctx.emitter
        .emit_with_payload(
            EventType::TeamStatus,
            "supervisor team final state",
            json!({
                "team_size": roster.list().len(),
                "mailbox_messages": mailbox.snapshot().len(),
            }),
        )
        .await;

    let result = finalize_fleet_results(
        ctx,
        input,
        &plan,
        results,
        StrategyKind::Supervisor,
        UsagePhase::Synthesis,
    )
    .await?;
    ctx.emitter
        .emit(EventType::WorkflowCompleted, "supervisor workflow completed")
        .await;
    Ok(result)
}

async fn execute_plan(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    plan: &DecompositionResult,
    board: &Arc<TopicBoard>,
) -> Result<Vec<AgentExecutionResult>> {
    match plan.execution_strategy {
        // Concurrent subtasks rendezvous through produced/consumed topics.
        ExecutionStrategy::Parallel | ExecutionStrategy::Hybrid => {
            let mut in_flight = FuturesUnordered::new();
            for index in 0..plan.subtasks.len() {
                let board = board.clone();
                in_flight.push(async move {
                    let empty = HashMap::new();
                    let result =
                        run_subtask(ctx, input, plan, index, &empty, Some(&board), true).await;
                    (index, result)
                });
            }

            let mut results: Vec<Option<AgentExecutionResult>> =
                vec![None; plan.subtasks.len()];
            while let Some((index, result)) = in_flight.next().await {
                results[index] = Some(result?);
            }
            Ok(results.into_iter().flatten().collect())
        }
        ExecutionStrategy::Sequential | ExecutionStrategy::Dag => {
            let mut completed: HashMap<String, AgentExecutionResult> = HashMap::new();
            let mut results = Vec::with_capacity(plan.subtasks.len());
            for index in 0..plan.subtasks.len() {
                ctx.checkpoint(checkpoints::PRE_EXECUTION).await?;
                let result =
                    run_subtask(ctx, input, plan, index, &completed, Some(board), true).await?;
                completed.insert(plan.subtasks[index].id.clone(), result.clone());
                results.push(result);
            }
            Ok(results)
        }
    }
}

/// Query handlers return snapshot copies, never live references.
fn register_queries(ctx: &WorkflowCtx, mailbox: &Arc<Mailbox>, roster: &Arc<TeamRoster>) {
    let mailbox_query = mailbox.clone();
    ctx.hub.register_query("getMailbox", move |_| {
        serde_json::to_value(mailbox_query.snapshot()).unwrap_or(Value::Null)
    });

    let roster_list = roster.clone();
    ctx.hub.register_query("listTeamAgents", move |_| {
        serde_json::to_value(roster_list.list()).unwrap_or(Value::Null)
    });

    let roster_find = roster.clone();
    ctx.hub.register_query("findTeamAgentsByRole", move |arg| {
        let role = arg.as_str().unwrap_or_default();
        serde_json::to_value(roster_find.find_by_role(role)).unwrap_or(Value::Null)
    });
}

/// Forward external mailbox signals into the owner-drained mailbox.
fn spawn_mailbox_forwarder(
    ctx: &WorkflowCtx,
    mailbox: &Arc<Mailbox>,
) -> tokio::task::JoinHandle<()> {
    let mut rx = ctx.hub.open_channel(MAILBOX_CHANNEL);
    let sender = mailbox.sender();
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            let message = match serde_json::from_value::<MailboxMessage>(payload.clone()) {
                Ok(message) => message,
                Err(_) => MailboxMessage::new("external", payload),
            };
            if sender.send(message).is_err() {
                break;
            }
        }
    })
}

/// Handle `recruit_v1`: authorize, add to the roster, and spawn a child
/// simple workflow whose result lands back in the mailbox.
fn spawn_recruit_listener(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    roster: &Arc<TeamRoster>,
    mailbox: &Arc<Mailbox>,
) -> tokio::task::JoinHandle<()> {
    let mut rx = ctx.hub.open_channel(RECRUIT_CHANNEL);
    let ctx = ctx.clone();
    let roster = roster.clone();
    let mailbox = mailbox.clone();
    let base_input = input.clone();

    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            let agent_id = payload["agent_id"].as_str().unwrap_or("recruit").to_string();
            let role = payload["role"].as_str().unwrap_or_default().to_string();
            let query = payload["query"].as_str().unwrap_or_default().to_string();

            let change = TeamChange {
                workflow_id: ctx.workflow_id.clone(),
                agent_id: agent_id.clone(),
                role: role.clone(),
                requested_by: payload["requested_by"].as_str().map(str::to_string),
            };
            match ctx.activities.team_policy.authorize_recruit(&change).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(agent_id = %agent_id, "Recruit denied by policy");
                    continue;
                }
                Err(error) => {
                    warn!(error = %error, "Recruit policy check failed");
                    continue;
                }
            }

            roster.recruit(&agent_id, &role);
            ctx.emitter
                .emit_agent(EventType::TeamRecruited, &agent_id, format!("role {role}"))
                .await;

            if query.is_empty() {
                continue;
            }

            // Recruited agents run as child simple workflows under this id.
            let child = ctx.child();
            roster.attach_workflow(&agent_id, &child.workflow_id);
            let mut child_input = base_input.clone();
            child_input.query = query;
            child_input.parent_workflow_id = Some(ctx.workflow_id.clone());
            child_input.context.routing.role = Some(role.clone());

            let outcome = simple::run_simple(&child, &child_input).await;
            ctx.finish_child(&child);

            let body = match outcome {
                Ok(result) => json!({"agent_id": agent_id, "result": result.result, "success": result.success}),
                Err(error) => json!({"agent_id": agent_id, "error": error.to_string(), "success": false}),
            };
            let _ = mailbox.sender().send(MailboxMessage::new(agent_id, body));
        }
    })
}

/// Handle `retire_v1`: authorize and drop the agent from the roster.
fn spawn_retire_listener(
    ctx: &WorkflowCtx,
    roster: &Arc<TeamRoster>,
) -> tokio::task::JoinHandle<()> {
    let mut rx = ctx.hub.open_channel(RETIRE_CHANNEL);
    let ctx = ctx.clone();
    let roster = roster.clone();

    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            let agent_id = payload["agent_id"].as_str().unwrap_or_default().to_string();
            let change = TeamChange {
                workflow_id: ctx.workflow_id.clone(),
                agent_id: agent_id.clone(),
                role: String::new(),
                requested_by: payload["requested_by"].as_str().map(str::to_string),
            };
            match ctx.activities.team_policy.authorize_retire(&change).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(agent_id = %agent_id, "Retire denied by policy");
                    continue;
                }
                Err(error) => {
                    warn!(error = %error, "Retire policy check failed");
                    continue;
                }
            }
            if roster.retire(&agent_id) {
                ctx.emitter
                    .emit_agent(EventType::TeamRetired, &agent_id, "retired")
                    .await;
            }
        }
    })
}

/// Consult supervisor memory for a better plan shape; a confident advisor
/// overrides the planned execution strategy.
async fn advise_decomposition(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    plan: &mut DecompositionResult,
) {
    let Some(user_id) = input.user_id.as_deref() else {
        return;
    };
    let memory = match ctx.activities.memory.fetch_supervisor_memory(user_id).await {
        Ok(Some(memory)) => memory,
        Ok(None) => return,
        Err(error) => {
            warn!(error = %error, "Supervisor memory fetch failed");
            return;
        }
    };

    match ctx
        .activities
        .planner
        .advise_decomposition(&input.query, &memory)
        .await
    {
        Ok(Some(advice)) if advice.confidence > 0.8 => {
            info!(
                confidence = advice.confidence,
                strategy = ?advice.execution_strategy,
                "Advisor override applied"
            );
            plan.execution_strategy = advice.execution_strategy;
        }
        Ok(_) => {}
        Err(error) => warn!(error = %error, "Decomposition advisor failed"),
    }
}
