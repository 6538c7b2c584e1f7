//! Pause/resume/cancel control handling.
//!
//! Signals mutate a shared [`ControlState`] and wake any workflow blocked at
//! a checkpoint. A pause received during an activity takes effect at the next
//! checkpoint, never mid-activity. Registered children receive every signal
//! so long-running grandchildren halt with their ancestors.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

use troupe_models::{ControlSignal, ControlState};

use crate::error::{EngineError, Result};

/// Checkpoint labels at the engine's major boundaries.
pub mod checkpoints {
    pub const PRE_ROUTING: &str = "pre_routing";
    pub const POST_DECOMPOSITION: &str = "post_decomposition";
    pub const POST_ROLE_ASSIGNMENT: &str = "post_role_assignment";
    pub const PRE_EXECUTION: &str = "pre_execution";
    pub const PRE_COMPLETION: &str = "pre_completion";

    /// `pre_<strategy>_workflow` for strategy hand-offs.
    pub fn pre_strategy(strategy: &str) -> String {
        format!("pre_{strategy}_workflow")
    }
}

struct ControlInner {
    state: RwLock<ControlState>,
    changed: Notify,
    children: RwLock<HashMap<String, ControlHandle>>,
}

/// Shared handle to one workflow's control state.
#[derive(Clone)]
pub struct ControlHandle {
    inner: Arc<ControlInner>,
}

impl ControlHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlInner {
                state: RwLock::new(ControlState::default()),
                changed: Notify::new(),
                children: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Deliver one control signal: mutate state, wake checkpoints, and
    /// propagate to every registered child.
    pub fn signal(&self, signal: ControlSignal) {
        self.inner.state.write().apply(&signal);
        self.inner.changed.notify_waiters();

        let children: Vec<ControlHandle> =
            self.inner.children.read().values().cloned().collect();
        for child in children {
            child.signal(signal.clone());
        }
    }

    pub fn pause(&self, reason: Option<String>, requested_by: Option<String>) {
        self.signal(ControlSignal::Pause {
            reason,
            requested_by,
        });
    }

    pub fn resume(&self) {
        self.signal(ControlSignal::Resume);
    }

    pub fn cancel(&self, reason: Option<String>) {
        self.signal(ControlSignal::Cancel { reason });
    }

    /// The only blocking control operation.
    ///
    /// Returns immediately when running; blocks while paused until a resume
    /// or cancel arrives; surfaces cancellation as an error.
    pub async fn check_pause_point(&self, label: &str) -> Result<()> {
        loop {
            // Arm the wakeup before reading state so a signal between the
            // read and the await cannot be missed.
            let notified = self.inner.changed.notified();
            {
                let state = self.inner.state.read();
                if state.cancelled {
                    let reason = state
                        .cancel_reason
                        .clone()
                        .unwrap_or_else(|| format!("cancelled at checkpoint {label}"));
                    return Err(EngineError::Cancelled(reason));
                }
                if !state.paused {
                    return Ok(());
                }
            }
            debug!(checkpoint = label, "Workflow paused, waiting for resume");
            notified.await;
        }
    }

    /// Register a child workflow for signal propagation. A child registered
    /// while paused or cancelled inherits that state immediately.
    pub fn register_child(&self, child_id: &str, child: ControlHandle) {
        let current = self.snapshot();
        if current.paused {
            child.signal(ControlSignal::Pause {
                reason: current.pause_reason.clone(),
                requested_by: current.paused_by.clone(),
            });
        }
        if current.cancelled {
            child.signal(ControlSignal::Cancel {
                reason: current.cancel_reason.clone(),
            });
        }

        self.inner
            .children
            .write()
            .insert(child_id.to_string(), child);
        self.inner
            .state
            .write()
            .child_workflows
            .insert(child_id.to_string());
        info!(child_id, "Registered child workflow");
    }

    pub fn unregister_child(&self, child_id: &str) {
        self.inner.children.write().remove(child_id);
        self.inner.state.write().child_workflows.remove(child_id);
    }

    /// Cancel every registered child without cancelling this workflow.
    /// This is the parent-close behavior: a closing parent requests
    /// cancellation of whatever children are still running.
    pub fn cancel_children(&self, reason: Option<String>) {
        let children: Vec<(String, ControlHandle)> = self
            .inner
            .children
            .read()
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();
        for (child_id, child) in children {
            info!(child_id = %child_id, "Cancelling child on parent close");
            child.signal(ControlSignal::Cancel {
                reason: reason.clone(),
            });
        }
    }

    /// Snapshot for the `queryControlState` handler.
    pub fn snapshot(&self) -> ControlState {
        self.inner.state.read().clone()
    }

    /// Forward signals from an external channel into this handle. The task
    /// ends when the sender side closes.
    pub fn spawn_signal_listener(
        &self,
        mut signals: mpsc::UnboundedReceiver<ControlSignal>,
    ) -> tokio::task::JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                debug!(?signal, "Control signal received");
                handle.signal(signal);
            }
            warn!("Control signal channel closed");
        })
    }
}

impl Default for ControlHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn checkpoint_passes_when_running() {
        let control = ControlHandle::new();
        control.check_pause_point("pre_routing").await.unwrap();
    }

    #[tokio::test]
    async fn pause_blocks_until_resume() {
        let control = ControlHandle::new();
        control.pause(Some("hold".into()), None);

        let waiter = control.clone();
        let blocked = tokio::spawn(async move { waiter.check_pause_point("pre_execution").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        control.resume();
        blocked.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancel_unblocks_with_error() {
        let control = ControlHandle::new();
        control.pause(None, None);

        let waiter = control.clone();
        let blocked = tokio::spawn(async move { waiter.check_pause_point("pre_execution").await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        control.cancel(Some("shutdown".into()));

        let error = blocked.await.unwrap().unwrap_err();
        assert!(error.is_cancellation());
    }

    #[tokio::test]
    async fn signals_propagate_to_children() {
        let parent = ControlHandle::new();
        let child = ControlHandle::new();
        parent.register_child("wf-child", child.clone());

        parent.pause(None, None);
        assert!(child.snapshot().paused);

        parent.resume();
        assert!(!child.snapshot().paused);

        parent.unregister_child("wf-child");
        parent.cancel(None);
        assert!(!child.snapshot().cancelled);
    }

    #[tokio::test]
    async fn late_registered_child_inherits_state() {
        let parent = ControlHandle::new();
        parent.pause(Some("hold".into()), None);

        let child = ControlHandle::new();
        parent.register_child("wf-child", child.clone());
        assert!(child.snapshot().paused);
        assert_eq!(child.snapshot().pause_reason.as_deref(), Some("hold"));
    }

    #[tokio::test]
    async fn listener_forwards_external_signals() {
        let control = ControlHandle::new();
        let (tx, rx) = mpsc::unbounded_channel();
        control.spawn_signal_listener(rx);

        tx.send(ControlSignal::Pause {
            reason: None,
            requested_by: Some("ops".into()),
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(control.snapshot().paused);
        assert_eq!(control.snapshot().paused_by.as_deref(), Some("ops"));
    }
}
