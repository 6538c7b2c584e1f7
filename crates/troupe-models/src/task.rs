//! Task input and result types.
//!
//! A [`TaskInput`] is the unit of work entering the engine; a [`TaskResult`]
//! is what comes back out, with the per-route rollups in [`TaskMetadata`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::AgentUsage;
use crate::citation::{Citation, CitationStats};
use crate::context::TaskContext;
use crate::decomposition::DecompositionResult;

/// One turn of prior conversation carried with a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The unit of work entering the engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskInput {
    /// Natural-language task. Required; an empty query fails validation.
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Free-form per-request configuration (typed envelope + open hints).
    #[serde(default)]
    pub context: TaskContext,
    /// Prior conversation turns, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    /// Session-scoped context persisted across requests.
    #[serde(default)]
    pub session_ctx: Map<String, Value>,
    #[serde(default)]
    pub mode: Option<String>,
    /// Explicit approval requirement; `None` defers to engine config.
    #[serde(default)]
    pub require_approval: Option<bool>,
    /// Approval wait in seconds; `None` defers to engine config.
    #[serde(default)]
    pub approval_timeout: Option<u64>,
    /// Return a lone successful agent response unsynthesized when safe.
    #[serde(default)]
    pub bypass_single_result: bool,
    /// When set, this run is a child and events emit under the parent.
    #[serde(default)]
    pub parent_workflow_id: Option<String>,
    #[serde(default)]
    pub suggested_tools: Vec<String>,
    #[serde(default)]
    pub tool_parameters: Map<String, Value>,
    /// Plan produced by an upstream router, skipping decomposition here.
    #[serde(default)]
    pub preplanned_decomposition: Option<DecompositionResult>,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub template_version: Option<String>,
    /// When true the request must resolve to a template or fail fast.
    #[serde(default)]
    pub disable_ai: bool,
}

impl TaskInput {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Template requested either via dedicated fields or context keys.
    pub fn requested_template(&self) -> Option<(String, Option<String>)> {
        if let Some(name) = &self.template_name {
            return Some((name.clone(), self.template_version.clone()));
        }
        self.context
            .routing
            .template_request()
            .map(|(name, version)| (name.to_string(), version.map(str::to_string)))
    }

    /// First turn of a session: no history yet but a session to title.
    pub fn is_first_session_turn(&self) -> bool {
        self.history.is_empty() && self.session_id.is_some()
    }
}

/// Per-run rollups attached to every [`TaskResult`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskMetadata {
    /// Which strategy actually ran (`simple`, `dag`, `supervisor`, ...).
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub model_used: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    /// Set when the budget preflight refused to run the plan.
    #[serde(default)]
    pub budget_blocked: bool,
    #[serde(default)]
    pub tool_errors: Vec<String>,
    /// Always present, one row per agent plus synthesis where applicable.
    #[serde(default)]
    pub agent_usages: Vec<AgentUsage>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub citation_stats: Option<CitationStats>,
    /// The original request context, echoed back for transports.
    #[serde(default)]
    pub context: Option<Value>,
    /// Strategy-specific extras (template checksum, node summaries, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskMetadata {
    pub fn insert_extra(&mut self, key: impl Into<String>, value: Value) {
        self.extra.insert(key.into(), value);
    }
}

/// Final outcome of one routed task.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskResult {
    pub success: bool,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub metadata: TaskMetadata,
}

impl TaskResult {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            success: true,
            result: result.into(),
            ..Default::default()
        }
    }

    /// Non-raising failure: `success=false` plus a human-readable reason.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.metadata.route = Some(route.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_input_defaults_deserialize() {
        let input: TaskInput = serde_json::from_str(r#"{"query": "What is 2+2?"}"#).unwrap();
        assert_eq!(input.query, "What is 2+2?");
        assert!(!input.bypass_single_result);
        assert!(input.history.is_empty());
        assert!(input.requested_template().is_none());
    }

    #[test]
    fn template_request_prefers_dedicated_fields() {
        let mut input = TaskInput::new("run the report");
        input.template_name = Some("weekly-report".into());
        input.template_version = Some("2".into());
        let (name, version) = input.requested_template().unwrap();
        assert_eq!(name, "weekly-report");
        assert_eq!(version.as_deref(), Some("2"));
    }

    #[test]
    fn template_request_falls_back_to_context() {
        let input: TaskInput = serde_json::from_value(serde_json::json!({
            "query": "run",
            "context": {"template": "audit"},
        }))
        .unwrap();
        let (name, version) = input.requested_template().unwrap();
        assert_eq!(name, "audit");
        assert!(version.is_none());
    }

    #[test]
    fn first_session_turn_requires_session_id() {
        let mut input = TaskInput::new("hi");
        assert!(!input.is_first_session_turn());
        input.session_id = Some("sess-1".into());
        assert!(input.is_first_session_turn());
        input.history.push(HistoryMessage::new("user", "earlier"));
        assert!(!input.is_first_session_turn());
    }

    #[test]
    fn failed_result_carries_message() {
        let result = TaskResult::failed("budget exceeded").with_route("dag");
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("budget exceeded"));
        assert_eq!(result.metadata.route.as_deref(), Some("dag"));
    }
}
