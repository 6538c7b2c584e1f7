//! Planning activities: decomposition, strategy recommendation, research
//! plans, and the supervisor's decomposition advisor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use troupe_models::{DecompositionResult, ExecutionStrategy, Subtask};

use crate::error::ActivityResult;

/// Input to the decomposition activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecompositionRequest {
    pub query: String,
    /// Serialized task context, augmented with current date and history.
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub available_tools: Vec<String>,
}

/// Output of the research-plan generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub plan: String,
    #[serde(default)]
    pub areas: Vec<String>,
    #[serde(default)]
    pub tokens_used: u64,
}

/// Suggestion from the supervisor's decomposition advisor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecompositionAdvice {
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub execution_strategy: ExecutionStrategy,
    /// Confidence in `[0, 1]`; above the override threshold the plan's
    /// strategy is replaced.
    #[serde(default)]
    pub confidence: f64,
}

#[async_trait]
pub trait Planner: Send + Sync {
    /// Decompose a query into a plan. Retried up to 3 times.
    async fn decompose_task(
        &self,
        request: DecompositionRequest,
    ) -> ActivityResult<DecompositionResult>;

    /// Continuous-learning strategy recommendation; `None` when the
    /// recommender has nothing confident to say.
    async fn recommend_strategy(
        &self,
        query: &str,
        context: &Value,
    ) -> ActivityResult<Option<String>>;

    /// Produce a human-reviewable research plan.
    async fn generate_research_plan(
        &self,
        query: &str,
        context: &Value,
    ) -> ActivityResult<ResearchPlan>;

    /// Advisor consulted by the supervisor strategy from supervisor memory.
    async fn advise_decomposition(
        &self,
        query: &str,
        memory: &Value,
    ) -> ActivityResult<Option<DecompositionAdvice>>;
}
