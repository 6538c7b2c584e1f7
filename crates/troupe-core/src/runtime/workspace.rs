//! Topic rendezvous over the workspace store.
//!
//! Producers append entries to named topics; consumers wait on a per-topic
//! channel combined with an exponential-backoff timer, checking the store on
//! each wake. Topics with no producer in the plan are skipped, not waited on.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, warn};

use troupe_models::WorkspaceEntry;
use troupe_telemetry::{Emitter, EventType};
use troupe_traits::WorkspaceStore;

use crate::config::P2pConfig;
use crate::error::Result;

/// Per-workflow topic board.
pub struct TopicBoard {
    workflow_id: String,
    store: Arc<dyn WorkspaceStore>,
    /// Lazily created per-topic wakeup channels.
    channels: DashMap<String, Arc<Notify>>,
    /// Topics some subtask in the plan produces.
    produced: HashSet<String>,
    config: P2pConfig,
}

impl TopicBoard {
    pub fn new(
        workflow_id: impl Into<String>,
        store: Arc<dyn WorkspaceStore>,
        produced: HashSet<String>,
        config: P2pConfig,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            store,
            channels: DashMap::new(),
            produced,
            config,
        }
    }

    fn channel(&self, topic: &str) -> Arc<Notify> {
        self.channels
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Append to a topic and wake any waiting consumer.
    pub async fn publish(&self, topic: &str, entry: Value) -> Result<u64> {
        let seq = self
            .store
            .append(&self.workflow_id, topic, entry)
            .await?;
        debug!(topic, seq, "Workspace entry published");
        self.channel(topic).notify_waiters();
        Ok(seq)
    }

    /// Wait for a topic to carry at least one entry.
    ///
    /// Returns `Ok(None)` without waiting when P2P is disabled or no subtask
    /// produces the topic, and after the bounded wait expires. Emits
    /// `agent.waiting` before the first wait and `dependency.satisfied` once
    /// entries appear.
    pub async fn wait_for(
        &self,
        topic: &str,
        emitter: &Emitter,
        agent_id: &str,
    ) -> Result<Option<Vec<WorkspaceEntry>>> {
        if !self.config.enabled {
            debug!(topic, "P2P disabled, skipping dependency wait");
            return Ok(None);
        }
        if !self.produced.contains(topic) {
            warn!(topic, "No producer for topic in plan, skipping wait");
            return Ok(None);
        }

        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.timeout_secs);
        let mut backoff = Duration::from_secs(self.config.initial_backoff_secs.max(1));
        let max_backoff = Duration::from_secs(self.config.max_backoff_secs.max(1));
        let channel = self.channel(topic);
        let mut first_check = true;

        loop {
            // Arm before checking the store so a publish in between wakes us.
            let notified = channel.notified();

            let entries = self.store.list(&self.workflow_id, topic, 0, 0).await?;
            if !entries.is_empty() {
                emitter
                    .emit_agent(
                        EventType::DependencySatisfied,
                        agent_id,
                        format!("topic {topic} satisfied with {} entries", entries.len()),
                    )
                    .await;
                return Ok(Some(entries));
            }

            if first_check {
                emitter
                    .emit_agent(
                        EventType::AgentWaiting,
                        agent_id,
                        format!("waiting on topic {topic}"),
                    )
                    .await;
                first_check = false;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(topic, "Dependency wait timed out, proceeding without it");
                return Ok(None);
            }
            let sleep = backoff.min(deadline - now);

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(sleep) => {}
            }
            backoff = (backoff * 2).min(max_backoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use troupe_telemetry::MemorySink;
    use troupe_traits::{ActivityError, ActivityResult};

    /// In-memory workspace store for tests.
    #[derive(Default)]
    struct MemoryWorkspace {
        entries: Mutex<HashMap<(String, String), Vec<WorkspaceEntry>>>,
    }

    #[async_trait]
    impl WorkspaceStore for MemoryWorkspace {
        async fn append(
            &self,
            workflow_id: &str,
            topic: &str,
            entry: Value,
        ) -> ActivityResult<u64> {
            let mut entries = self.entries.lock();
            let list = entries
                .entry((workflow_id.to_string(), topic.to_string()))
                .or_default();
            let seq = list.last().map(|e| e.seq + 1).unwrap_or(1);
            list.push(WorkspaceEntry::new(topic, seq, entry));
            Ok(seq)
        }

        async fn list(
            &self,
            workflow_id: &str,
            topic: &str,
            since_seq: u64,
            limit: usize,
        ) -> ActivityResult<Vec<WorkspaceEntry>> {
            let entries = self.entries.lock();
            let mut list: Vec<WorkspaceEntry> = entries
                .get(&(workflow_id.to_string(), topic.to_string()))
                .map(|l| l.iter().filter(|e| e.seq > since_seq).cloned().collect())
                .unwrap_or_default();
            if limit > 0 {
                list.truncate(limit);
            }
            Ok(list)
        }
    }

    fn board(produced: &[&str], config: P2pConfig) -> (TopicBoard, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let board = TopicBoard::new(
            "wf-1",
            Arc::new(MemoryWorkspace::default()),
            produced.iter().map(|s| s.to_string()).collect(),
            config,
        );
        (board, sink)
    }

    #[tokio::test]
    async fn publish_assigns_monotone_seq() {
        let (board, _) = board(&["notes"], P2pConfig::default());
        let first = board.publish("notes", serde_json::json!("a")).await.unwrap();
        let second = board.publish("notes", serde_json::json!("b")).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn waiter_wakes_on_publish() {
        let (board, sink) = board(&["notes"], P2pConfig::default());
        let board = Arc::new(board);
        let emitter = Emitter::new(sink.clone(), "wf-1");

        let waiter_board = board.clone();
        let waiter = tokio::spawn(async move {
            waiter_board
                .wait_for("notes", &Emitter::new(sink, "wf-1"), "agent-2")
                .await
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        board.publish("notes", serde_json::json!("ready")).await.unwrap();

        let entries = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(entries.len(), 1);
        drop(emitter);
    }

    #[tokio::test]
    async fn unproduced_topic_is_skipped() {
        let (board, sink) = board(&[], P2pConfig::default());
        let emitter = Emitter::new(sink.clone(), "wf-1");
        let result = board.wait_for("ghost", &emitter, "agent-1").await.unwrap();
        assert!(result.is_none());
        assert_eq!(sink.count_of(EventType::AgentWaiting), 0);
    }

    #[tokio::test]
    async fn disabled_p2p_skips_wait() {
        let config = P2pConfig {
            enabled: false,
            ..P2pConfig::default()
        };
        let (board, sink) = board(&["notes"], config);
        let emitter = Emitter::new(sink, "wf-1");
        let result = board.wait_for("notes", &emitter, "agent-1").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn wait_times_out_and_proceeds() {
        let config = P2pConfig {
            enabled: true,
            timeout_secs: 1,
            initial_backoff_secs: 1,
            max_backoff_secs: 1,
        };
        let (board, sink) = board(&["notes"], config);
        let emitter = Emitter::new(sink.clone(), "wf-1");
        let result = board.wait_for("notes", &emitter, "agent-1").await.unwrap();
        assert!(result.is_none());
        assert_eq!(sink.count_of(EventType::AgentWaiting), 1);
    }

    #[tokio::test]
    async fn store_errors_propagate() {
        struct BrokenStore;
        #[async_trait]
        impl WorkspaceStore for BrokenStore {
            async fn append(&self, _: &str, _: &str, _: Value) -> ActivityResult<u64> {
                Err(ActivityError::Fatal("down".into()))
            }
            async fn list(
                &self,
                _: &str,
                _: &str,
                _: u64,
                _: usize,
            ) -> ActivityResult<Vec<WorkspaceEntry>> {
                Err(ActivityError::Fatal("down".into()))
            }
        }

        let board = TopicBoard::new(
            "wf-1",
            Arc::new(BrokenStore),
            HashSet::from(["notes".to_string()]),
            P2pConfig::default(),
        );
        let sink = Arc::new(MemorySink::new());
        let emitter = Emitter::new(sink, "wf-1");
        assert!(board.wait_for("notes", &emitter, "a").await.is_err());
    }
}
