//! Dynamic-team policy checks for recruit/retire signals.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ActivityResult;

/// A requested change to the supervisor's team.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamChange {
    pub workflow_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub requested_by: Option<String>,
}

#[async_trait]
pub trait TeamPolicy: Send + Sync {
    /// Whether the requester may add this agent to the team.
    async fn authorize_recruit(&self, change: &TeamChange) -> ActivityResult<bool>;

    /// Whether the requester may remove this agent from the team.
    async fn authorize_retire(&self, change: &TeamChange) -> ActivityResult<bool>;
}
