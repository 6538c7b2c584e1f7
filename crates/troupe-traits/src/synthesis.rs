//! Synthesis, evaluation, and claim verification activities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use troupe_models::{AgentExecutionResult, Citation};

use crate::error::ActivityResult;

/// Input to LLM synthesis over collected agent results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub query: String,
    pub agent_results: Vec<AgentExecutionResult>,
    /// Synthesis context built by the engine (citation block included).
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub collected_citations: Vec<Citation>,
    #[serde(default)]
    pub parent_workflow_id: Option<String>,
}

/// Output of LLM synthesis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisOutput {
    pub final_result: String,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub model_used: String,
    #[serde(default)]
    pub provider: String,
}

/// Result evaluation used by the reflection pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evaluation {
    /// Score in `[0, 1]`.
    pub score: f64,
    #[serde(default)]
    pub feedback: String,
}

/// Output of claim verification against fetch-derived citations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    pub verified: bool,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tokens_used: u64,
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Combine agent results into one answer. Retried up to 3 times.
    async fn synthesize(&self, request: SynthesisRequest) -> ActivityResult<SynthesisOutput>;

    /// Score a candidate answer against the query and criteria.
    async fn evaluate_result(
        &self,
        query: &str,
        response: &str,
        criteria: &str,
    ) -> ActivityResult<Evaluation>;

    /// Verify claims in a response against fetch-only citations.
    async fn verify_claims(
        &self,
        query: &str,
        response: &str,
        citations: &[Citation],
    ) -> ActivityResult<VerificationReport>;
}
