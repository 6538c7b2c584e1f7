//! Pause/resume/cancel control state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External control signal, delivered on the `pause`/`resume`/`cancel`
/// channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "signal", rename_all = "lowercase")]
pub enum ControlSignal {
    Pause {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        requested_by: Option<String>,
    },
    Resume,
    Cancel {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Queryable per-workflow control state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlState {
    pub paused: bool,
    #[serde(default)]
    pub pause_reason: Option<String>,
    #[serde(default)]
    pub paused_by: Option<String>,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resumed_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    /// Ids of active child workflows signals propagate to.
    #[serde(default)]
    pub child_workflows: BTreeSet<String>,
}

impl ControlState {
    pub fn apply(&mut self, signal: &ControlSignal) {
        match signal {
            ControlSignal::Pause {
                reason,
                requested_by,
            } => {
                self.paused = true;
                self.pause_reason = reason.clone();
                self.paused_by = requested_by.clone();
                self.paused_at = Some(Utc::now());
            }
            ControlSignal::Resume => {
                self.paused = false;
                self.resumed_at = Some(Utc::now());
            }
            ControlSignal::Cancel { reason } => {
                self.cancelled = true;
                self.cancel_reason = reason.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_pause_then_resume() {
        let mut state = ControlState::default();
        state.apply(&ControlSignal::Pause {
            reason: Some("operator".into()),
            requested_by: Some("ops".into()),
        });
        assert!(state.paused);
        assert_eq!(state.pause_reason.as_deref(), Some("operator"));
        state.apply(&ControlSignal::Resume);
        assert!(!state.paused);
        assert!(state.resumed_at.is_some());
    }

    #[test]
    fn cancel_is_sticky() {
        let mut state = ControlState::default();
        state.apply(&ControlSignal::Cancel { reason: None });
        state.apply(&ControlSignal::Resume);
        assert!(state.cancelled);
    }
}
