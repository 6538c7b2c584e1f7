//! Budget preflight, backpressure, provider rate control, and budgeted
//! agent execution.

use std::time::Duration;

use tracing::{info, warn};

use troupe_models::{
    AgentExecutionResult, BudgetHints, DecompositionResult, ModelHints, UsagePhase,
};
use troupe_traits::{
    ActivityError, AgentExecutionRequest, BudgetCheckRequest, BudgetedExecutionRequest,
};

use crate::config::BudgetConfig;
use crate::error::{EngineError, Result};
use crate::pricing;
use crate::retry::with_retries;
use crate::runtime::WorkflowCtx;

/// What preflight leaves behind for budget-aware execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreflightOutcome {
    pub remaining_task_budget: u64,
    pub budget_pressure: f64,
}

/// Plan-based token estimate: a per-subtask base scaled by complexity.
pub fn estimate_plan_tokens(config: &BudgetConfig, plan: &DecompositionResult) -> u64 {
    let subtasks = plan.subtasks.len().max(1) as f64;
    let multiplier = if plan.complexity_score > config.complex_threshold {
        config.complex_multiplier
    } else if plan.complexity_score > config.elevated_threshold {
        config.elevated_multiplier
    } else {
        1.0
    };
    (config.per_subtask_estimate as f64 * subtasks * multiplier) as u64
}

/// Per-agent budget: remaining budget split across subtasks, clamped by the
/// request hint and the engine cap.
pub fn derive_agent_budget(
    config: &BudgetConfig,
    remaining: u64,
    subtask_count: usize,
    hints: &BudgetHints,
) -> u64 {
    let mut per_agent = remaining / subtask_count.max(1) as u64;
    if let Some(cap) = hints.token_budget_per_agent {
        per_agent = per_agent.min(cap);
    }
    if let Some(cap) = config.agent_max_cap {
        per_agent = per_agent.min(cap);
    }
    per_agent
}

/// Budget preflight with backpressure and rate control.
///
/// Sleeps out any backpressure delay, then fails with
/// [`EngineError::BudgetDenied`] when the budget service refuses the
/// estimate. Rate control applies afterwards so a blocked request never
/// pays the pacing delay.
pub async fn preflight(
    ctx: &WorkflowCtx,
    user_id: Option<&str>,
    session_id: Option<&str>,
    estimated_tokens: u64,
    model_hints: &ModelHints,
) -> Result<PreflightOutcome> {
    let request = BudgetCheckRequest {
        user_id: user_id.map(str::to_string),
        session_id: session_id.map(str::to_string),
        task_id: ctx.workflow_id.clone(),
        estimated_tokens,
    };

    let budget = ctx.activities.budget.clone();
    let decision = with_retries("check_token_budget", 2, move || {
        let budget = budget.clone();
        let request = request.clone();
        async move { budget.check_token_budget(request).await }
    })
    .await?;

    if decision.backpressure_active && decision.backpressure_delay_ms > 0 {
        info!(
            delay_ms = decision.backpressure_delay_ms,
            pressure = decision.budget_pressure,
            "Budget backpressure, pausing"
        );
        tokio::time::sleep(Duration::from_millis(decision.backpressure_delay_ms)).await;
    }

    if !decision.can_proceed {
        ctx.metrics
            .budget_denials
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let reason = if decision.reason.is_empty() {
            "token budget exhausted".to_string()
        } else {
            decision.reason
        };
        return Err(EngineError::BudgetDenied(reason));
    }

    rate_control(ctx, model_hints).await;

    Ok(PreflightOutcome {
        remaining_task_budget: decision.remaining_task_budget,
        budget_pressure: decision.budget_pressure,
    })
}

/// Provider/tier pacing delay, observed into the rate-delay histogram and
/// slept in workflow time.
pub async fn rate_control(ctx: &WorkflowCtx, hints: &ModelHints) {
    let config = &ctx.config.rate;
    if !config.enabled {
        return;
    }

    let provider = hints
        .provider_hint()
        .map(str::to_string)
        .or_else(|| {
            hints
                .model
                .as_deref()
                .and_then(pricing::detect_provider)
                .map(str::to_string)
        });

    let base = provider
        .as_deref()
        .and_then(|p| config.provider_delay_ms.get(p).copied())
        .unwrap_or(config.default_delay_ms);

    let tier = hints.model_tier.as_deref().unwrap_or("medium");
    let multiplier = config.tier_multipliers.get(tier).copied().unwrap_or(1.0);

    let delay_ms = (base as f64 * multiplier) as u64;
    ctx.metrics.record_rate_delay(delay_ms);
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

/// Execute one agent, budgeted when a per-agent budget applies.
///
/// The budgeted activity records token usage internally; the unbudgeted path
/// records here. Repeated transient failures surface as a `success=false`
/// result so the caller's failure accounting sees them; cancellation always
/// propagates.
pub async fn execute_agent(
    ctx: &WorkflowCtx,
    request: AgentExecutionRequest,
    budget_agent_max: u64,
    tier: Option<&str>,
    user_id: Option<&str>,
    session_id: Option<&str>,
) -> Result<AgentExecutionResult> {
    let agent_id = request.agent_id.clone();
    let attempts = ctx.config.loops.max_retries_per_task;

    let outcome = if budget_agent_max > 0 {
        let budgeted = BudgetedExecutionRequest {
            agent: request,
            max_tokens: budget_agent_max,
            user_id: user_id.map(str::to_string),
            task_id: ctx.workflow_id.clone(),
            model_tier: tier.map(str::to_string),
        };
        let agents = ctx.activities.agents.clone();
        with_retries("execute_agent_with_budget", attempts, move || {
            let agents = agents.clone();
            let request = budgeted.clone();
            async move { agents.execute_agent_with_budget(request).await }
        })
        .await
    } else {
        let agents = ctx.activities.agents.clone();
        let unbudgeted = request;
        let result = with_retries("execute_agent", attempts, move || {
            let agents = agents.clone();
            let request = unbudgeted.clone();
            async move { agents.execute_agent(request).await }
        })
        .await;
        if let Ok(result) = &result {
            let (input, output) = result.token_split();
            ctx.record_usage(
                &result.agent_id,
                &result.model_used,
                &result.provider,
                input,
                output,
                UsagePhase::Agent,
                user_id,
                session_id,
            )
            .await;
        }
        result
    };

    ctx.metrics
        .agents_executed
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    match outcome {
        Ok(result) => Ok(result),
        Err(ActivityError::Cancelled) => Err(EngineError::Activity(ActivityError::Cancelled)),
        Err(error) => {
            warn!(agent_id = %agent_id, error = %error, "Agent execution failed after retries");
            ctx.metrics
                .agent_failures
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Ok(AgentExecutionResult {
                agent_id,
                success: false,
                error: Some(error.to_string()),
                ..Default::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_scales_with_complexity() {
        let config = BudgetConfig::default();
        let mut plan = DecompositionResult::default();
        plan.subtasks = vec![Default::default(), Default::default()];

        plan.complexity_score = 0.2;
        assert_eq!(estimate_plan_tokens(&config, &plan), 4_000);
        plan.complexity_score = 0.5;
        assert_eq!(estimate_plan_tokens(&config, &plan), 6_000);
        plan.complexity_score = 0.9;
        assert_eq!(estimate_plan_tokens(&config, &plan), 10_000);
    }

    #[test]
    fn empty_plan_still_estimates_one_subtask() {
        let config = BudgetConfig::default();
        let plan = DecompositionResult::default();
        assert_eq!(estimate_plan_tokens(&config, &plan), 2_000);
    }

    #[test]
    fn agent_budget_splits_and_clamps() {
        let config = BudgetConfig::default();
        let hints = BudgetHints::default();
        assert_eq!(derive_agent_budget(&config, 9_000, 3, &hints), 3_000);

        let capped_hints = BudgetHints {
            token_budget_per_agent: Some(1_000),
            ..Default::default()
        };
        assert_eq!(derive_agent_budget(&config, 9_000, 3, &capped_hints), 1_000);

        let capped_config = BudgetConfig {
            agent_max_cap: Some(500),
            ..Default::default()
        };
        assert_eq!(derive_agent_budget(&capped_config, 9_000, 3, &hints), 500);
    }
}
