//! Workspace store: topic-keyed append-only entries per workflow.

use async_trait::async_trait;
use serde_json::Value;

use troupe_models::WorkspaceEntry;

use crate::error::ActivityResult;

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Append an entry to a topic and return its sequence number.
    /// Sequence numbers are monotonically increasing per topic per workflow.
    async fn append(&self, workflow_id: &str, topic: &str, entry: Value) -> ActivityResult<u64>;

    /// List entries for a topic with `seq > since_seq`, oldest first,
    /// at most `limit` entries (0 means no limit).
    async fn list(
        &self,
        workflow_id: &str,
        topic: &str,
        since_seq: u64,
        limit: usize,
    ) -> ActivityResult<Vec<WorkspaceEntry>>;
}
