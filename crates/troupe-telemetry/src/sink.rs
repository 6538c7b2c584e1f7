//! Event sinks and the workflow-scoped emitter.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::event::{EventType, TaskEvent};

#[derive(Error, Debug)]
#[error("event sink failure: {0}")]
pub struct SinkError(pub String);

/// Where task events go. Implementations must not block the workflow for
/// long; the emitter gives each send one attempt and suppresses failures.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: TaskEvent) -> Result<(), SinkError>;
}

/// Sink that drops everything.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: TaskEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// In-memory buffering sink for tests and local inspection.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<TaskEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().clone()
    }

    pub fn count_of(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn emit(&self, event: TaskEvent) -> Result<(), SinkError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Workflow-scoped emitter.
///
/// Child workflows with a parent set emit under the parent's id and, for SSE
/// purposes, are gated off entirely (`skip_sse`) so the stream carries each
/// event once.
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn EventSink>,
    workflow_id: String,
    /// Events emit under this id; equals `workflow_id` for root runs.
    stream_id: String,
    skip_sse: bool,
}

impl Emitter {
    pub fn new(sink: Arc<dyn EventSink>, workflow_id: impl Into<String>) -> Self {
        let workflow_id = workflow_id.into();
        Self {
            sink,
            stream_id: workflow_id.clone(),
            workflow_id,
            skip_sse: false,
        }
    }

    /// Emitter for a child run: events carry the parent's stream id and the
    /// child skips SSE emission to avoid duplicates.
    pub fn for_child(&self, child_workflow_id: impl Into<String>) -> Self {
        Self {
            sink: self.sink.clone(),
            workflow_id: child_workflow_id.into(),
            stream_id: self.stream_id.clone(),
            skip_sse: true,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn skips_sse(&self) -> bool {
        self.skip_sse
    }

    /// Emit an event. One attempt; failures are logged and suppressed.
    pub async fn emit(&self, event_type: EventType, message: impl Into<String>) {
        self.send(TaskEvent::new(&self.stream_id, event_type).with_message(message))
            .await;
    }

    pub async fn emit_agent(
        &self,
        event_type: EventType,
        agent_id: &str,
        message: impl Into<String>,
    ) {
        self.send(
            TaskEvent::new(&self.stream_id, event_type)
                .with_agent(agent_id)
                .with_message(message),
        )
        .await;
    }

    pub async fn emit_with_payload(
        &self,
        event_type: EventType,
        message: impl Into<String>,
        payload: serde_json::Value,
    ) {
        self.send(
            TaskEvent::new(&self.stream_id, event_type)
                .with_message(message)
                .with_payload(payload),
        )
        .await;
    }

    async fn send(&self, event: TaskEvent) {
        if self.skip_sse && is_sse_only(event.event_type) {
            return;
        }
        if let Err(error) = self.sink.emit(event.clone()).await {
            warn!(
                workflow_id = %self.workflow_id,
                event_type = event.event_type.as_str(),
                error = %error,
                "Failed to emit task event"
            );
        }
    }
}

/// Lifecycle events a child must not duplicate onto the parent's stream.
fn is_sse_only(event_type: EventType) -> bool {
    matches!(
        event_type,
        EventType::WorkflowStarted | EventType::WorkflowCompleted | EventType::StreamEnd
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_tags_events_with_stream_id() {
        let sink = Arc::new(MemorySink::new());
        let emitter = Emitter::new(sink.clone(), "wf-root");
        emitter.emit(EventType::Progress, "halfway").await;

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].workflow_id, "wf-root");
    }

    #[tokio::test]
    async fn child_emits_under_parent_and_gates_lifecycle() {
        let sink = Arc::new(MemorySink::new());
        let parent = Emitter::new(sink.clone(), "wf-root");
        let child = parent.for_child("wf-child");

        child.emit(EventType::WorkflowStarted, "child up").await;
        child.emit_agent(EventType::AgentCompleted, "agent-1", "done").await;

        let events = sink.events();
        assert_eq!(events.len(), 1, "lifecycle event should be gated");
        assert_eq!(events[0].event_type, EventType::AgentCompleted);
        assert_eq!(events[0].workflow_id, "wf-root");
    }

    #[tokio::test]
    async fn failing_sink_is_suppressed() {
        struct FailingSink;
        #[async_trait]
        impl EventSink for FailingSink {
            async fn emit(&self, _event: TaskEvent) -> Result<(), SinkError> {
                Err(SinkError("down".into()))
            }
        }

        let emitter = Emitter::new(Arc::new(FailingSink), "wf-1");
        // Must not panic or propagate.
        emitter.emit(EventType::Progress, "ok").await;
    }
}
