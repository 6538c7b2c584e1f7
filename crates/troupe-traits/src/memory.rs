//! Memory and context-compression activities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use troupe_models::HistoryMessage;

use crate::error::ActivityResult;

/// Input to history compression.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub history: Vec<HistoryMessage>,
    /// Token budget the compressed summary must fit in.
    pub target_tokens: u64,
}

/// Output of history compression.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressedContext {
    pub summary: String,
    #[serde(default)]
    pub tokens_used: u64,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Session-scoped memory for the simple strategy, if any.
    async fn fetch_session_memory(&self, session_id: &str) -> ActivityResult<Option<Value>>;

    /// Cross-session hierarchical memory for a user, if any.
    async fn fetch_hierarchical_memory(
        &self,
        user_id: &str,
        query: &str,
    ) -> ActivityResult<Option<Value>>;

    /// Supervisor memory: past decompositions, strategy performance, failure
    /// patterns, user expertise.
    async fn fetch_supervisor_memory(&self, user_id: &str) -> ActivityResult<Option<Value>>;

    /// Whether the session's stored context is due for compression.
    async fn check_compression_needed(&self, session_id: &str) -> ActivityResult<bool>;

    /// Compress history into a summary and persist it.
    async fn compress_and_store_context(
        &self,
        request: CompressionRequest,
    ) -> ActivityResult<CompressedContext>;

    /// Record the post-compression state for the session.
    async fn update_compression_state(
        &self,
        session_id: &str,
        summary_tokens: u64,
    ) -> ActivityResult<()>;
}
