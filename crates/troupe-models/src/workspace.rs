//! Workspace entries: the peer-to-peer rendezvous records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One append to a named topic, keyed by workflow id in the store.
/// `seq` is monotonically increasing per topic within a workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    pub topic: String,
    pub seq: u64,
    pub entry: Value,
    pub timestamp: DateTime<Utc>,
}

impl WorkspaceEntry {
    pub fn new(topic: impl Into<String>, seq: u64, entry: Value) -> Self {
        Self {
            topic: topic.into(),
            seq,
            entry,
            timestamp: Utc::now(),
        }
    }
}
