//! Named signal channels and query handlers for one workflow.
//!
//! Transports deliver payloads onto channels like `mailbox_v1`,
//! `recruit_v1`, `retire_v1`, or `human-approval-<id>`; whichever workflow
//! code opened the channel drains it. Query handlers expose snapshots
//! (mailbox contents, team roster) without touching workflow state.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

type QueryFn = dyn Fn(Value) -> Value + Send + Sync;

/// Per-workflow signal and query routing table.
#[derive(Default)]
pub struct SignalHub {
    signals: DashMap<String, mpsc::UnboundedSender<Value>>,
    queries: DashMap<String, Arc<QueryFn>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a named channel, replacing any previous listener.
    pub fn open_channel(&self, name: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.signals.insert(name.to_string(), tx);
        rx
    }

    pub fn close_channel(&self, name: &str) {
        self.signals.remove(name);
    }

    /// Deliver a payload to a channel. Returns false when nothing listens.
    pub fn signal(&self, name: &str, payload: Value) -> bool {
        match self.signals.get(name) {
            Some(sender) => {
                debug!(channel = name, "Signal delivered");
                sender.send(payload).is_ok()
            }
            None => false,
        }
    }

    /// Register a query handler (e.g. `getMailbox`).
    pub fn register_query<F>(&self, name: &str, handler: F)
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.queries.insert(name.to_string(), Arc::new(handler));
    }

    /// Run a query handler. `None` when no handler is registered.
    pub fn query(&self, name: &str, arg: Value) -> Option<Value> {
        let handler = self.queries.get(name)?.clone();
        Some(handler(arg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_reaches_open_channel() {
        let hub = SignalHub::new();
        let mut rx = hub.open_channel("mailbox_v1");
        assert!(hub.signal("mailbox_v1", serde_json::json!({"from": "a"})));
        let payload = rx.recv().await.unwrap();
        assert_eq!(payload["from"], "a");
    }

    #[test]
    fn signal_without_listener_is_reported() {
        let hub = SignalHub::new();
        assert!(!hub.signal("nobody-home", Value::Null));
    }

    #[test]
    fn query_handlers_round_trip() {
        let hub = SignalHub::new();
        hub.register_query("getMailbox", |_| serde_json::json!(["m1", "m2"]));
        let result = hub.query("getMailbox", Value::Null).unwrap();
        assert_eq!(result.as_array().unwrap().len(), 2);
        assert!(hub.query("unknown", Value::Null).is_none());
    }
}
