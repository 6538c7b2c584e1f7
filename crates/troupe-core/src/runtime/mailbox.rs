//! Supervisor mailbox and dynamic team roster.
//!
//! External `mailbox_v1` messages arrive on an unbounded channel drained by
//! a single owner task, which is the only writer to the message log. Query
//! handlers return snapshot copies so readers never race the owner.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// One message delivered to a supervisor's mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxMessage {
    pub from: String,
    #[serde(default)]
    pub topic: Option<String>,
    pub body: Value,
    pub timestamp: DateTime<Utc>,
}

impl MailboxMessage {
    pub fn new(from: impl Into<String>, body: Value) -> Self {
        Self {
            from: from.into(),
            topic: None,
            body,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only mailbox with a single owner task.
pub struct Mailbox {
    messages: Arc<RwLock<Vec<MailboxMessage>>>,
    tx: mpsc::UnboundedSender<MailboxMessage>,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<MailboxMessage>();
        let messages: Arc<RwLock<Vec<MailboxMessage>>> = Arc::new(RwLock::new(Vec::new()));

        let store = messages.clone();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                debug!(from = %message.from, "Mailbox message received");
                store.write().push(message);
            }
        });

        Self { messages, tx }
    }

    /// Sender handed to the signal surface.
    pub fn sender(&self) -> mpsc::UnboundedSender<MailboxMessage> {
        self.tx.clone()
    }

    /// `getMailbox` query: a snapshot copy of the log.
    pub fn snapshot(&self) -> Vec<MailboxMessage> {
        self.messages.read().clone()
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// One member of a supervisor's dynamic team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamAgent {
    pub agent_id: String,
    pub role: String,
    /// Child workflow running on behalf of this agent, if spawned.
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub recruited_at: DateTime<Utc>,
}

/// The supervisor's team, mutated by recruit/retire signals.
#[derive(Default)]
pub struct TeamRoster {
    agents: RwLock<Vec<TeamAgent>>,
}

impl TeamRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recruit(&self, agent_id: impl Into<String>, role: impl Into<String>) -> TeamAgent {
        let agent = TeamAgent {
            agent_id: agent_id.into(),
            role: role.into(),
            workflow_id: None,
            recruited_at: Utc::now(),
        };
        self.agents.write().push(agent.clone());
        agent
    }

    /// Remove an agent by id. Returns whether anything was removed.
    pub fn retire(&self, agent_id: &str) -> bool {
        let mut agents = self.agents.write();
        let before = agents.len();
        agents.retain(|a| a.agent_id != agent_id);
        agents.len() != before
    }

    pub fn attach_workflow(&self, agent_id: &str, workflow_id: &str) {
        let mut agents = self.agents.write();
        if let Some(agent) = agents.iter_mut().find(|a| a.agent_id == agent_id) {
            agent.workflow_id = Some(workflow_id.to_string());
        }
    }

    /// `listTeamAgents` query: snapshot copy.
    pub fn list(&self) -> Vec<TeamAgent> {
        self.agents.read().clone()
    }

    /// `findTeamAgentsByRole` query: snapshot copy filtered by role.
    pub fn find_by_role(&self, role: &str) -> Vec<TeamAgent> {
        self.agents
            .read()
            .iter()
            .filter(|a| a.role == role)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn mailbox_owner_drains_channel() {
        let mailbox = Mailbox::new();
        let sender = mailbox.sender();
        sender
            .send(MailboxMessage::new("agent-1", serde_json::json!({"k": 1})))
            .unwrap();
        sender
            .send(MailboxMessage::new("agent-2", serde_json::json!({"k": 2})))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let snapshot = mailbox.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].from, "agent-1");

        // Snapshot is a copy: mutating it does not touch the mailbox.
        let mut copy = snapshot;
        copy.clear();
        assert_eq!(mailbox.snapshot().len(), 2);
    }

    #[test]
    fn roster_recruit_retire_and_query() {
        let roster = TeamRoster::new();
        roster.recruit("a1", "researcher");
        roster.recruit("a2", "writer");
        roster.recruit("a3", "researcher");

        assert_eq!(roster.list().len(), 3);
        assert_eq!(roster.find_by_role("researcher").len(), 2);

        assert!(roster.retire("a2"));
        assert!(!roster.retire("a2"));
        assert_eq!(roster.list().len(), 2);
    }

    #[test]
    fn attach_workflow_links_agent() {
        let roster = TeamRoster::new();
        roster.recruit("a1", "researcher");
        roster.attach_workflow("a1", "wf-9");
        assert_eq!(roster.list()[0].workflow_id.as_deref(), Some("wf-9"));
    }
}
