//! The router: plans, gates, and delegates every incoming task.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use troupe_models::{ControlState, DecompositionResult, TaskInput, TaskResult, UsagePhase};
use troupe_telemetry::{EngineMetrics, EventSink, EventType, MetricsSnapshot};
use troupe_traits::{Activities, ApprovalRequest, DecompositionRequest};

use crate::budget;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::retry::with_retries;
use crate::runtime::{ControlHandle, SignalHub, WorkflowCtx, checkpoints};
use crate::strategies::{
    StrategyKind, browser::run_browser, dag::run_dag, react::run_react, simple::run_simple,
    supervisor::run_supervisor, template::run_template,
};
use crate::template::TemplateRegistry;

/// External handle to a running workflow: control signals plus the named
/// signal/query surface.
#[derive(Clone)]
pub struct WorkflowHandle {
    pub control: ControlHandle,
    pub hub: Arc<SignalHub>,
}

/// The orchestration engine.
pub struct Engine {
    activities: Activities,
    config: Arc<EngineConfig>,
    metrics: Arc<EngineMetrics>,
    sink: Arc<dyn EventSink>,
    templates: Arc<TemplateRegistry>,
    running: DashMap<String, WorkflowHandle>,
}

impl Engine {
    pub fn new(activities: Activities, config: EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            activities,
            config: Arc::new(config),
            metrics: EngineMetrics::new(),
            sink,
            templates: Arc::new(TemplateRegistry::new()),
            running: DashMap::new(),
        }
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Deliver an external signal to a running workflow.
    ///
    /// `pause`/`resume`/`cancel` go to the control handler; everything else
    /// (`mailbox_v1`, `recruit_v1`, `retire_v1`, `human-approval-<id>`,
    /// `research-plan-approved-<id>`) is routed by channel name.
    pub fn signal(&self, workflow_id: &str, channel: &str, payload: Value) -> bool {
        let Some(handle) = self.running.get(workflow_id) else {
            return false;
        };
        match channel {
            "pause" => {
                handle.control.pause(
                    payload["reason"].as_str().map(str::to_string),
                    payload["requested_by"].as_str().map(str::to_string),
                );
                true
            }
            "resume" => {
                handle.control.resume();
                true
            }
            "cancel" => {
                handle
                    .control
                    .cancel(payload["reason"].as_str().map(str::to_string));
                true
            }
            other => handle.hub.signal(other, payload),
        }
    }

    /// Ids of workflows currently executing.
    pub fn running_workflows(&self) -> Vec<String> {
        self.running.iter().map(|entry| entry.key().clone()).collect()
    }

    /// `queryControlState` handler.
    pub fn query_control_state(&self, workflow_id: &str) -> Option<ControlState> {
        self.running
            .get(workflow_id)
            .map(|handle| handle.control.snapshot())
    }

    /// Named query handlers (`getMailbox`, `listTeamAgents`, ...).
    pub fn query(&self, workflow_id: &str, name: &str, arg: Value) -> Option<Value> {
        self.running.get(workflow_id)?.hub.query(name, arg)
    }

    /// Route one task through planning, gating, and a strategy workflow.
    ///
    /// Budget, approval, and validation failures return `success=false`
    /// results; cancellation surfaces as [`EngineError::Cancelled`].
    pub async fn route(&self, input: TaskInput) -> Result<TaskResult> {
        let ctx = WorkflowCtx::new_root(
            self.activities.clone(),
            self.config.clone(),
            self.metrics.clone(),
            self.sink.clone(),
            input.parent_workflow_id.clone(),
        );
        self.running.insert(
            ctx.workflow_id.clone(),
            WorkflowHandle {
                control: ctx.control.clone(),
                hub: ctx.hub.clone(),
            },
        );
        self.metrics.workflows_started.fetch_add(1, Ordering::Relaxed);

        let outcome = self.route_inner(&ctx, input).await;

        // Every final path schedules stream.end; cancellation additionally
        // emits workflow.cancelled so the stream sees a terminal event.
        match &outcome {
            Ok(result) => {
                if result.success {
                    self.metrics.workflows_completed.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.metrics.workflows_failed.fetch_add(1, Ordering::Relaxed);
                }
                ctx.emitter
                    .emit(EventType::WorkflowCompleted, "workflow completed")
                    .await;
            }
            Err(error) if error.is_cancellation() => {
                self.metrics.workflows_cancelled.fetch_add(1, Ordering::Relaxed);
                ctx.emitter
                    .emit(EventType::WorkflowCancelled, error.to_string())
                    .await;
            }
            Err(error) => {
                self.metrics.workflows_failed.fetch_add(1, Ordering::Relaxed);
                ctx.emitter
                    .emit(EventType::ErrorOccurred, error.to_string())
                    .await;
            }
        }
        ctx.cancel_children("parent workflow closed");
        ctx.emitter.emit(EventType::StreamEnd, "stream end").await;
        self.running.remove(&ctx.workflow_id);

        outcome
    }

    async fn route_inner(&self, ctx: &WorkflowCtx, mut input: TaskInput) -> Result<TaskResult> {
        if input.query.trim().is_empty() {
            return Ok(TaskResult::failed("query must not be empty"));
        }

        ctx.emitter
            .emit_with_payload(
                EventType::WorkflowStarted,
                truncate(&input.query, 120),
                json!({"session_id": input.session_id, "user_id": input.user_id}),
            )
            .await;

        ctx.checkpoint(checkpoints::PRE_ROUTING).await?;

        self.session_bookkeeping(&input);

        // Template requests trump everything else.
        if let Some((name, version)) = input.requested_template() {
            match self.try_template(ctx, &input, &name, version.as_deref()).await {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {}
                Err(error) => return Err(error),
            }
        }
        if input.disable_ai {
            return Ok(TaskResult::failed(
                "AI is disabled and no template matched the request",
            ));
        }

        // Continuous learning: a confident recommender can pre-pick a route.
        let recommended = self.recommend_strategy(ctx, &input).await;

        if input.context.routing.force_research {
            return self.run_research_path(ctx, &input).await;
        }

        // Role-assigned requests bypass LLM decomposition entirely.
        let plan = if let Some(role) = input.context.routing.role.clone() {
            ctx.emitter
                .emit(EventType::RoleAssigned, format!("role {role}"))
                .await;
            let plan = DecompositionResult::for_role(
                &input.query,
                &role,
                input.suggested_tools.clone(),
            );
            ctx.checkpoint(checkpoints::POST_ROLE_ASSIGNMENT).await?;
            plan
        } else if let Some(plan) = input.preplanned_decomposition.clone() {
            plan
        } else {
            let plan = self.decompose(ctx, &input).await?;
            ctx.checkpoint(checkpoints::POST_DECOMPOSITION).await?;
            plan
        };

        // Budget preflight only applies to identified users.
        if input.user_id.is_some() {
            match self.budget_preflight(ctx, &mut input, &plan).await {
                Ok(()) => {}
                Err(EngineError::BudgetDenied(reason)) => {
                    let mut result =
                        TaskResult::failed(format!("budget denied: {reason}"));
                    result.metadata.budget_blocked = true;
                    return Ok(result);
                }
                Err(error) => return Err(error),
            }
        }

        if let Some(result) = self.approval_gate(ctx, &input, &plan).await? {
            return Ok(result);
        }

        let route = self.pick_route(&input, &plan, recommended);
        info!(route = route.name(), subtasks = plan.subtasks.len(), "Route selected");
        ctx.emitter
            .emit(
                EventType::Delegation,
                format!("delegating to {} strategy", route.name()),
            )
            .await;

        self.dispatch(ctx, input, plan, route).await
    }

    /// Fire-and-forget session bookkeeping on the first turn.
    fn session_bookkeeping(&self, input: &TaskInput) {
        let Some(session_id) = input.session_id.clone() else {
            return;
        };
        let persistence = self.activities.persistence.clone();
        let query = input.query.clone();
        let first_turn = input.is_first_session_turn();
        tokio::spawn(async move {
            if let Err(error) = persistence.record_query(&session_id, &query).await {
                warn!(error = %error, "Failed to record query");
            }
            if first_turn {
                if let Err(error) = persistence.generate_session_title(&session_id, &query).await
                {
                    warn!(error = %error, "Failed to generate session title");
                }
            }
        });
    }

    /// Resolve and run a requested template. `Ok(None)` means fall back to
    /// normal routing (when fallback is permitted).
    async fn try_template(
        &self,
        ctx: &WorkflowCtx,
        input: &TaskInput,
        name: &str,
        version: Option<&str>,
    ) -> Result<Option<TaskResult>> {
        let fallback_enabled = input
            .context
            .routing
            .template_fallback_enabled
            .unwrap_or(self.config.routing.template_fallback_enabled);

        let Some(template) = self.templates.resolve(name, version) else {
            if input.disable_ai || !fallback_enabled {
                return Ok(Some(TaskResult::failed(format!(
                    "template {name} not found"
                ))));
            }
            warn!(template = name, "Template not found, falling back to routing");
            return Ok(None);
        };

        ctx.checkpoint(&checkpoints::pre_strategy(StrategyKind::Template.name()))
            .await?;
        match run_template(ctx, input, template).await {
            Ok(mut result) => {
                result.metadata.context = Some(input.context.to_value());
                Ok(Some(result))
            }
            Err(error) if error.is_cancellation() => Err(error),
            Err(error) => {
                if fallback_enabled && !input.disable_ai {
                    warn!(error = %error, "Template failed, falling back to routing");
                    Ok(None)
                } else {
                    Ok(Some(TaskResult::failed(error.to_string())))
                }
            }
        }
    }

    async fn recommend_strategy(
        &self,
        _ctx: &WorkflowCtx,
        input: &TaskInput,
    ) -> Option<StrategyKind> {
        let learning_requested = self.config.routing.continuous_learning
            || input.context.routing.learning_strategy.is_some();
        if !learning_requested {
            return None;
        }
        match self
            .activities
            .planner
            .recommend_strategy(&input.query, &input.context.to_value())
            .await
        {
            Ok(Some(name)) => {
                // Templates resolve earlier in the cascade and cannot be a
                // recommendation target.
                let kind = StrategyKind::parse(&name).filter(|k| *k != StrategyKind::Template);
                if kind.is_none() {
                    debug!(strategy = %name, "Recommender returned unknown strategy");
                }
                kind
            }
            Ok(None) => None,
            Err(error) => {
                warn!(error = %error, "Strategy recommendation failed");
                None
            }
        }
    }

    /// `force_research`: skip decomposition, optionally review the research
    /// plan with a human, then delegate to the research loop.
    async fn run_research_path(&self, ctx: &WorkflowCtx, input: &TaskInput) -> Result<TaskResult> {
        let mut input = input.clone();

        match self
            .activities
            .planner
            .generate_research_plan(&input.query, &input.context.to_value())
            .await
        {
            Ok(plan) => {
                if input.context.review.require_review {
                    ctx.emitter
                        .emit_with_payload(
                            EventType::ResearchPlanReady,
                            "research plan ready for review",
                            json!({"plan": plan.plan, "areas": plan.areas}),
                        )
                        .await;

                    let channel = format!("research-plan-approved-{}", ctx.workflow_id);
                    let mut rx = ctx.hub.open_channel(&channel);
                    let timeout = Duration::from_secs(
                        input
                            .context
                            .review
                            .review_timeout
                            .unwrap_or(self.config.review.timeout_secs),
                    );

                    match tokio::time::timeout(timeout, rx.recv()).await {
                        Ok(Some(payload)) => {
                            if !payload["approved"].as_bool().unwrap_or(true) {
                                let feedback =
                                    payload["feedback"].as_str().unwrap_or("plan rejected");
                                return Ok(TaskResult::failed(format!(
                                    "research plan rejected: {feedback}"
                                )));
                            }
                            ctx.emitter
                                .emit(EventType::ResearchPlanApproved, "research plan approved")
                                .await;
                        }
                        // Review is advisory: silence proceeds with the plan.
                        _ => {
                            warn!("Research plan review timed out, proceeding");
                        }
                    }
                    ctx.hub.close_channel(&channel);
                }
                if !plan.areas.is_empty() {
                    input.context.routing.research_areas = plan.areas;
                }
                input.context.set_hint("research_plan", json!(plan.plan));
            }
            Err(error) => warn!(error = %error, "Research plan generation failed"),
        }

        ctx.checkpoint(&checkpoints::pre_strategy(StrategyKind::Research.name()))
            .await?;
        self.dispatch(ctx, input, DecompositionResult::default(), StrategyKind::Research)
            .await
    }

    async fn decompose(&self, ctx: &WorkflowCtx, input: &TaskInput) -> Result<DecompositionResult> {
        let mut context = match input.context.to_value() {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        context.insert(
            "current_date".to_string(),
            json!(Utc::now().format("%Y-%m-%d").to_string()),
        );
        if !input.history.is_empty() {
            context.insert(
                "history".to_string(),
                serde_json::to_value(&input.history).unwrap_or(Value::Null),
            );
        }

        let request = DecompositionRequest {
            query: input.query.clone(),
            context: Value::Object(context),
            available_tools: input.suggested_tools.clone(),
        };

        let planner = self.activities.planner.clone();
        let retried = request.clone();
        let plan = with_retries("decompose_task", 3, move || {
            let planner = planner.clone();
            let request = retried.clone();
            async move { planner.decompose_task(request).await }
        })
        .await?;

        ctx.record_usage(
            "planner",
            &plan.model_used,
            &plan.provider,
            plan.input_tokens,
            plan.output_tokens,
            UsagePhase::Planning,
            input.user_id.as_deref(),
            input.session_id.as_deref(),
        )
        .await;

        if let Err(error) = self
            .activities
            .persistence
            .record_decomposition(&ctx.workflow_id, &plan)
            .await
        {
            warn!(error = %error, "Failed to record decomposition");
        }

        Ok(plan)
    }

    /// Estimate tokens from the plan, run preflight, and stash the derived
    /// per-agent budget into the request context.
    async fn budget_preflight(
        &self,
        ctx: &WorkflowCtx,
        input: &mut TaskInput,
        plan: &DecompositionResult,
    ) -> Result<()> {
        let estimated = budget::estimate_plan_tokens(&self.config.budget, plan);
        let outcome = budget::preflight(
            ctx,
            input.user_id.as_deref(),
            input.session_id.as_deref(),
            estimated,
            &input.context.model,
        )
        .await?;

        let remaining = outcome.remaining_task_budget;
        let per_agent = budget::derive_agent_budget(
            &self.config.budget,
            remaining,
            plan.subtasks.len(),
            &input.context.budget,
        );
        input.context.budget.budget_remaining = Some(remaining);
        input.context.budget.budget_agent_max = Some(per_agent);
        debug!(estimated, remaining, per_agent, "Budget preflight passed");
        Ok(())
    }

    /// Approval gate: policy decides whether a human must sign off before
    /// execution. Returns a failure result on denial or timeout.
    async fn approval_gate(
        &self,
        ctx: &WorkflowCtx,
        input: &TaskInput,
        plan: &DecompositionResult,
    ) -> Result<Option<TaskResult>> {
        let requested = input
            .require_approval
            .or(input.context.review.require_approval)
            .unwrap_or(self.config.approval.require_by_default);
        if !requested {
            return Ok(None);
        }

        let dangerous: Vec<String> = plan
            .subtasks
            .iter()
            .flat_map(|s| s.suggested_tools.iter())
            .chain(input.suggested_tools.iter())
            .filter(|tool| self.config.approval.dangerous_tools.contains(tool))
            .cloned()
            .collect();

        let policy_triggered = plan.complexity_score >= self.config.approval.complexity_threshold
            || !dangerous.is_empty();
        if !policy_triggered {
            return Ok(None);
        }

        self.metrics.approvals_requested.fetch_add(1, Ordering::Relaxed);
        let approval_id = self
            .activities
            .approvals
            .request_approval(ApprovalRequest {
                workflow_id: ctx.workflow_id.clone(),
                query: input.query.clone(),
                complexity_score: plan.complexity_score,
                dangerous_tools: dangerous.clone(),
                subtask_count: plan.subtasks.len(),
            })
            .await?;
        ctx.emitter
            .emit_with_payload(
                EventType::ApprovalRequested,
                "waiting for human approval",
                json!({"approval_id": approval_id, "dangerous_tools": dangerous}),
            )
            .await;

        let channel = format!("human-approval-{}", ctx.workflow_id);
        let mut rx = ctx.hub.open_channel(&channel);
        let timeout = Duration::from_secs(
            input
                .approval_timeout
                .or(input.context.review.approval_timeout)
                .unwrap_or(self.config.approval.timeout_secs),
        );

        let (approved, feedback) = match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(payload)) => (
                payload["approved"].as_bool().unwrap_or(false),
                payload["feedback"].as_str().unwrap_or_default().to_string(),
            ),
            _ => (false, "approval timeout".to_string()),
        };
        ctx.hub.close_channel(&channel);

        ctx.emitter
            .emit_with_payload(
                EventType::ApprovalDecision,
                if approved { "approved" } else { "denied" },
                json!({"approval_id": approval_id, "approved": approved, "feedback": feedback}),
            )
            .await;

        if approved {
            Ok(None)
        } else {
            self.metrics.approvals_denied.fetch_add(1, Ordering::Relaxed);
            Ok(Some(TaskResult::failed(format!(
                "approval denied: {feedback}"
            ))))
        }
    }

    /// The routing tie-breaks, in priority order.
    fn pick_route(
        &self,
        input: &TaskInput,
        plan: &DecompositionResult,
        recommended: Option<StrategyKind>,
    ) -> StrategyKind {
        if let Some(kind) = recommended {
            return kind;
        }
        if let Some(kind) = plan.cognitive_override().and_then(StrategyKind::parse) {
            return kind;
        }

        let role_browser = input
            .context
            .routing
            .role
            .as_deref()
            .is_some_and(|role| role == "browser_use");
        let query_lower = input.query.to_lowercase();
        let browser_domain = self
            .config
            .routing
            .browser_required_domains
            .iter()
            .any(|domain| query_lower.contains(domain.as_str()));
        if role_browser || browser_domain {
            return StrategyKind::BrowserUse;
        }

        let force_p2p = input.context.routing.force_p2p;
        let simple_by_shape =
            plan.mode == troupe_models::TaskMode::Simple || plan.subtasks.len() <= 1;
        if simple_by_shape
            && plan.complexity_score < self.config.routing.simple_complexity_threshold
            && !force_p2p
        {
            return StrategyKind::Simple;
        }

        if plan.subtasks.len() > self.config.routing.supervisor_subtask_threshold
            || plan.has_dependencies()
            || force_p2p
        {
            return StrategyKind::Supervisor;
        }

        StrategyKind::Dag
    }

    /// Start the chosen strategy as a child workflow and wait for it.
    async fn dispatch(
        &self,
        ctx: &WorkflowCtx,
        mut input: TaskInput,
        plan: DecompositionResult,
        route: StrategyKind,
    ) -> Result<TaskResult> {
        ctx.checkpoint(&checkpoints::pre_strategy(route.name())).await?;

        let original_context = input.context.to_value();
        input.parent_workflow_id = Some(ctx.workflow_id.clone());
        if !plan.subtasks.is_empty() {
            input.preplanned_decomposition = Some(plan);
        }

        let child = ctx.child();
        let outcome = match route {
            StrategyKind::Simple => run_simple(&child, &input).await,
            StrategyKind::Dag => run_dag(&child, &input).await,
            StrategyKind::Supervisor => run_supervisor(&child, &input).await,
            StrategyKind::BrowserUse => run_browser(&child, &input).await,
            StrategyKind::Template => unreachable!("templates dispatch in try_template"),
            kind => run_react(&child, &input, kind).await,
        };
        ctx.finish_child(&child);

        let mut result = outcome?;
        result.metadata.context = Some(original_context);
        if result.metadata.route.is_none() {
            result.metadata.route = Some(route.name().to_string());
        }
        Ok(result)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
