//! Agent execution activities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use troupe_models::{AgentExecutionResult, HistoryMessage};

use crate::error::ActivityResult;

/// Input to a single agent execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentExecutionRequest {
    pub query: String,
    pub agent_id: String,
    /// Serialized context handed through to the agent.
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    #[serde(default)]
    pub suggested_tools: Vec<String>,
    #[serde(default)]
    pub tool_parameters: Map<String, Value>,
    #[serde(default)]
    pub parent_workflow_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Budget-enforced agent execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetedExecutionRequest {
    pub agent: AgentExecutionRequest,
    pub max_tokens: u64,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub model_tier: Option<String>,
}

#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Execute one agent. Token usage is recorded by the caller.
    async fn execute_agent(
        &self,
        request: AgentExecutionRequest,
    ) -> ActivityResult<AgentExecutionResult>;

    /// Execute one agent under a token ceiling. The activity records token
    /// usage internally; callers must not double-record.
    async fn execute_agent_with_budget(
        &self,
        request: BudgetedExecutionRequest,
    ) -> ActivityResult<AgentExecutionResult>;

    /// Consolidated one-shot agent used by the simple strategy and template
    /// simple nodes.
    async fn execute_simple_task(
        &self,
        request: AgentExecutionRequest,
    ) -> ActivityResult<AgentExecutionResult>;
}
