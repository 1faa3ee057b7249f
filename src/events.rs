//! Event Broadcaster (spec §4.8): fans out typed progress events to
//! per-session subscribers, decoupled from the Manager.
//!
//! Grounded on the broadcast-channel pattern used for the dashboard's
//! live event stream (`tuitbot-server/src/ws.rs`): one `tokio::sync::broadcast`
//! channel per session. A slow subscriber that falls behind the channel's
//! capacity has its oldest unread events silently dropped by `broadcast`
//! itself (`RecvError::Lagged`) — exactly the liveness guarantee spec §4.8
//! asks for, with no bespoke ring buffer needed.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// The closed set of event kinds the core may publish (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ManagerThinking,
    AgentSubstep,
    BrainAllocation,
    WorkflowStateChange,
    UserDecisionNeeded,
    ErrorRecovery,
    AgentConversation,
    ChatMessage,
    TypingIndicator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub data: Value,
}

impl Event {
    pub fn new(session_id: impl Into<String>, kind: EventKind, data: Value) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            kind,
            data,
        }
    }
}

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Holds a set of per-session subscribers. Publish is non-blocking and
/// best-effort: a session with no subscribers simply drops the event.
pub struct Broadcaster {
    channels: Mutex<HashMap<String, broadcast::Sender<Event>>>,
    capacity: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Subscribe to a session's event stream. Creates the channel on first
    /// subscription; subsequent calls for the same session share it.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<Event> {
        let mut channels = self.channels.lock().unwrap();
        let sender = channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        sender.subscribe()
    }

    /// `publish(session_id, event_type, data)` (spec §6). Never blocks the
    /// Manager: if nobody is subscribed, the send is simply dropped.
    pub fn publish(&self, session_id: &str, kind: EventKind, data: Value) {
        let sender = {
            let mut channels = self.channels.lock().unwrap();
            channels
                .entry(session_id.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .clone()
        };

        let event = Event::new(session_id, kind, data);
        // send() fails only when there are zero receivers — that is a
        // transient delivery failure per spec §4.8, logged and dropped.
        if sender.send(event).is_err() {
            tracing::debug!(session_id, ?kind, "broadcast with no subscribers");
        }
    }

    /// Drops a session's channel once the request is fully done and no
    /// further events will be published for it.
    pub fn close_session(&self, session_id: &str) {
        self.channels.lock().unwrap().remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_publish_order() {
        let b = Broadcaster::new();
        let mut rx = b.subscribe("sess-1");

        b.publish("sess-1", EventKind::ManagerThinking, serde_json::json!({"n": 1}));
        b.publish("sess-1", EventKind::ManagerThinking, serde_json::json!({"n": 2}));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.data["n"], 1);
        assert_eq!(second.data["n"], 2);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let b = Broadcaster::new();
        b.publish("ghost-session", EventKind::ChatMessage, serde_json::json!({}));
    }

    #[tokio::test]
    async fn lagging_subscriber_drops_oldest_not_newest() {
        let b = Broadcaster::with_capacity(2);
        let mut rx = b.subscribe("sess-1");

        for n in 0..5 {
            b.publish("sess-1", EventKind::AgentSubstep, serde_json::json!({"n": n}));
        }

        // The channel only holds `capacity` events; the receiver will observe
        // a Lagged error and then see the most recent surviving events, never
        // entries that arrived before the drop.
        let mut seen = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(ev) => seen.push(ev.data["n"].as_i64().unwrap()),
                Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        assert_eq!(seen, vec![3, 4]);
    }
}
