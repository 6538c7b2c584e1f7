//! Task event types and their wire names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event kinds streamed by the engine. Serialized names are the wire
/// contract; transports match on them verbatim.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    #[serde(rename = "workflow.started")]
    WorkflowStarted,
    #[serde(rename = "workflow.completed")]
    WorkflowCompleted,
    #[serde(rename = "workflow.cancelled")]
    WorkflowCancelled,
    #[serde(rename = "stream.end")]
    StreamEnd,
    #[serde(rename = "agent.thinking")]
    AgentThinking,
    #[serde(rename = "agent.started")]
    AgentStarted,
    #[serde(rename = "agent.waiting")]
    AgentWaiting,
    #[serde(rename = "agent.completed")]
    AgentCompleted,
    #[serde(rename = "llm.output")]
    LlmOutput,
    #[serde(rename = "progress")]
    Progress,
    #[serde(rename = "data.processing")]
    DataProcessing,
    #[serde(rename = "dependency.satisfied")]
    DependencySatisfied,
    #[serde(rename = "delegation")]
    Delegation,
    #[serde(rename = "role.assigned")]
    RoleAssigned,
    #[serde(rename = "team.status")]
    TeamStatus,
    #[serde(rename = "team.recruited")]
    TeamRecruited,
    #[serde(rename = "team.retired")]
    TeamRetired,
    #[serde(rename = "error.occurred")]
    ErrorOccurred,
    #[serde(rename = "approval.requested")]
    ApprovalRequested,
    #[serde(rename = "approval.decision")]
    ApprovalDecision,
    #[serde(rename = "research.plan.ready")]
    ResearchPlanReady,
    #[serde(rename = "research.plan.approved")]
    ResearchPlanApproved,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow.started",
            Self::WorkflowCompleted => "workflow.completed",
            Self::WorkflowCancelled => "workflow.cancelled",
            Self::StreamEnd => "stream.end",
            Self::AgentThinking => "agent.thinking",
            Self::AgentStarted => "agent.started",
            Self::AgentWaiting => "agent.waiting",
            Self::AgentCompleted => "agent.completed",
            Self::LlmOutput => "llm.output",
            Self::Progress => "progress",
            Self::DataProcessing => "data.processing",
            Self::DependencySatisfied => "dependency.satisfied",
            Self::Delegation => "delegation",
            Self::RoleAssigned => "role.assigned",
            Self::TeamStatus => "team.status",
            Self::TeamRecruited => "team.recruited",
            Self::TeamRetired => "team.retired",
            Self::ErrorOccurred => "error.occurred",
            Self::ApprovalRequested => "approval.requested",
            Self::ApprovalDecision => "approval.decision",
            Self::ResearchPlanReady => "research.plan.ready",
            Self::ResearchPlanApproved => "research.plan.approved",
        }
    }
}

/// One streamed progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Workflow the event belongs to; for child runs this is the parent id.
    pub workflow_id: String,
    pub event_type: EventType,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl TaskEvent {
    pub fn new(workflow_id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            event_type,
            agent_id: None,
            message: String::new(),
            timestamp: Utc::now(),
            payload: None,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_wire_names_round_trip() {
        for event_type in [
            EventType::WorkflowStarted,
            EventType::StreamEnd,
            EventType::DependencySatisfied,
            EventType::ResearchPlanApproved,
        ] {
            let wire = serde_json::to_value(event_type).unwrap();
            assert_eq!(wire, serde_json::json!(event_type.as_str()));
            let back: EventType = serde_json::from_value(wire).unwrap();
            assert_eq!(back, event_type);
        }
    }

    #[test]
    fn builder_sets_fields() {
        let event = TaskEvent::new("wf-1", EventType::AgentStarted)
            .with_agent("agent-2")
            .with_message("starting")
            .with_payload(serde_json::json!({"subtask": "task-2"}));
        assert_eq!(event.workflow_id, "wf-1");
        assert_eq!(event.agent_id.as_deref(), Some("agent-2"));
        assert!(event.payload.is_some());
    }
}
