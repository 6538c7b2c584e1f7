//! Human approval gate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ActivityResult;

/// Approval request surfaced to a human reviewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub workflow_id: String,
    pub query: String,
    #[serde(default)]
    pub complexity_score: f64,
    /// Planned tools that triggered the approval policy.
    #[serde(default)]
    pub dangerous_tools: Vec<String>,
    #[serde(default)]
    pub subtask_count: usize,
}

/// Reviewer decision, or the timeout default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approval_id: String,
    pub approved: bool,
    #[serde(default)]
    pub feedback: String,
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Register an approval request; the decision arrives later on the
    /// `human-approval-<id>` signal.
    async fn request_approval(&self, request: ApprovalRequest) -> ActivityResult<String>;
}
