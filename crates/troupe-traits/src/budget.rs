//! Token budget and usage-recording activities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use troupe_models::TokenUsageRecord;

use crate::error::ActivityResult;

/// Input to the budget preflight check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetCheckRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub task_id: String,
    pub estimated_tokens: u64,
}

/// Decision returned by the budget service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetDecision {
    pub can_proceed: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub backpressure_active: bool,
    /// Delay the workflow must sleep before proceeding.
    #[serde(default)]
    pub backpressure_delay_ms: u64,
    /// Pressure in `[0, 1]`; informational.
    #[serde(default)]
    pub budget_pressure: f64,
    #[serde(default)]
    pub remaining_task_budget: u64,
}

#[async_trait]
pub trait BudgetControl: Send + Sync {
    /// Preflight a token estimate, with backpressure hints.
    async fn check_token_budget(
        &self,
        request: BudgetCheckRequest,
    ) -> ActivityResult<BudgetDecision>;

    /// Record usage for billing. Fire-and-forget semantics at call sites.
    async fn record_token_usage(&self, record: TokenUsageRecord) -> ActivityResult<()>;
}
