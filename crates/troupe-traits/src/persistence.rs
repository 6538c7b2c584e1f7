//! Persistence activities: fire-and-forget stores and session bookkeeping.
//!
//! Failures here are logged and suppressed by the engine; none of these
//! calls may fail a workflow.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use troupe_models::{AgentExecutionResult, DecompositionResult, ToolExecution};

use crate::error::ActivityResult;

/// One agent performance sample for the learning store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPerformanceRecord {
    pub agent_id: String,
    pub success: bool,
    pub tokens_used: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub mode: String,
}

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Record the inbound query for a session.
    async fn record_query(&self, session_id: &str, query: &str) -> ActivityResult<()>;

    /// Update session state with the final result and usage.
    async fn update_session_result(
        &self,
        session_id: &str,
        result: &str,
        tokens_used: u64,
    ) -> ActivityResult<()>;

    /// Store a decomposition for the learning loop.
    async fn record_decomposition(
        &self,
        workflow_id: &str,
        decomposition: &DecompositionResult,
    ) -> ActivityResult<()>;

    /// Store one agent performance sample.
    async fn record_agent_performance(
        &self,
        record: AgentPerformanceRecord,
    ) -> ActivityResult<()>;

    /// Persist a full agent execution outside the workflow history.
    async fn persist_agent_execution(
        &self,
        workflow_id: &str,
        result: &AgentExecutionResult,
    ) -> ActivityResult<()>;

    /// Persist a single tool execution outside the workflow history.
    async fn persist_tool_execution(
        &self,
        workflow_id: &str,
        agent_id: &str,
        execution: &ToolExecution,
    ) -> ActivityResult<()>;

    /// Generate and store a session title from the first query.
    async fn generate_session_title(&self, session_id: &str, query: &str) -> ActivityResult<()>;

    /// Engine configuration snapshot for transports.
    async fn get_workflow_config(&self) -> ActivityResult<Value>;
}
