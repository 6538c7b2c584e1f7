//! Workflow execution context and runtime plumbing.

pub mod control;
pub mod mailbox;
pub mod signals;
pub mod workspace;

use std::sync::Arc;

use uuid::Uuid;

use troupe_models::{TokenUsageRecord, UsagePhase};
use troupe_telemetry::{Emitter, EngineMetrics, EventSink};
use troupe_traits::Activities;

use crate::config::EngineConfig;
use crate::error::Result;

pub use control::{ControlHandle, checkpoints};
pub use mailbox::{Mailbox, MailboxMessage, TeamAgent, TeamRoster};
pub use signals::SignalHub;
pub use workspace::TopicBoard;

/// Per-execution handle carried through every workflow function.
///
/// Holds the ids, configuration, activity bundle, event emitter and control
/// handle for one workflow execution. Child contexts share the sink and
/// config but get their own workflow id and control handle, registered with
/// the parent for signal propagation.
#[derive(Clone)]
pub struct WorkflowCtx {
    pub workflow_id: String,
    pub parent_workflow_id: Option<String>,
    pub activities: Activities,
    pub config: Arc<EngineConfig>,
    pub metrics: Arc<EngineMetrics>,
    pub emitter: Emitter,
    pub control: ControlHandle,
    pub hub: Arc<SignalHub>,
}

impl WorkflowCtx {
    /// Root context for a new workflow execution.
    ///
    /// When `parent_workflow_id` is set the run is treated as a child of an
    /// external workflow: events stream under the parent id.
    pub fn new_root(
        activities: Activities,
        config: Arc<EngineConfig>,
        metrics: Arc<EngineMetrics>,
        sink: Arc<dyn EventSink>,
        parent_workflow_id: Option<String>,
    ) -> Self {
        let workflow_id = format!("wf-{}", Uuid::new_v4());
        let emitter = match &parent_workflow_id {
            Some(parent) => Emitter::new(sink, parent.clone()).for_child(workflow_id.clone()),
            None => Emitter::new(sink, workflow_id.clone()),
        };
        Self {
            workflow_id,
            parent_workflow_id,
            activities,
            config,
            metrics,
            emitter,
            control: ControlHandle::new(),
            hub: Arc::new(SignalHub::new()),
        }
    }

    /// Context for a child workflow started by this one.
    ///
    /// The child's control handle is registered with this workflow so
    /// pause/resume/cancel propagate; the caller must
    /// [`finish_child`](Self::finish_child) once the child returns. Closing
    /// the parent cancels every still-registered child.
    pub fn child(&self) -> WorkflowCtx {
        let child_id = format!("wf-{}", Uuid::new_v4());
        let control = ControlHandle::new();
        self.control.register_child(&child_id, control.clone());
        WorkflowCtx {
            emitter: self.emitter.for_child(child_id.clone()),
            workflow_id: child_id,
            parent_workflow_id: Some(self.workflow_id.clone()),
            activities: self.activities.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            control,
            // Children share the parent's signal namespace: a supervisor's
            // mailbox keeps receiving while its children run.
            hub: self.hub.clone(),
        }
    }

    /// Unregister a completed child.
    pub fn finish_child(&self, child: &WorkflowCtx) {
        self.control.unregister_child(&child.workflow_id);
    }

    /// Evaluate a named checkpoint (see [`checkpoints`]).
    pub async fn checkpoint(&self, label: &str) -> Result<()> {
        self.control.check_pause_point(label).await
    }

    /// Record token usage for billing. Fire-and-forget: failures are logged
    /// and suppressed, never failing the workflow.
    pub async fn record_usage(
        &self,
        agent_id: &str,
        model: &str,
        provider: &str,
        input_tokens: u64,
        output_tokens: u64,
        phase: UsagePhase,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) {
        let record = TokenUsageRecord {
            user_id: user_id.map(str::to_string),
            session_id: session_id.map(str::to_string),
            task_id: self.workflow_id.clone(),
            agent_id: agent_id.to_string(),
            model: model.to_string(),
            provider: provider.to_string(),
            input_tokens,
            output_tokens,
            phase: Some(phase),
            metadata: Default::default(),
        };
        if let Err(error) = self.activities.budget.record_token_usage(record).await {
            tracing::warn!(
                workflow_id = %self.workflow_id,
                phase = phase.as_str(),
                error = %error,
                "Failed to record token usage"
            );
        }
    }

    /// Cancel all still-registered children. Called on every exit path so
    /// grandchildren halt when this workflow closes.
    pub fn cancel_children(&self, reason: &str) {
        self.control.cancel_children(Some(reason.to_string()));
    }
}
