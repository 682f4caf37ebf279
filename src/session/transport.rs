//! Remote observer transport boundary.
//!
//! The orchestrator broadcasts a closed set of typed messages to attached
//! observers. Delivery is fire-and-forget: an implementation must not block
//! the caller, and a failed delivery to one observer must not affect
//! delivery to others or session state.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::format::OutputRecord;
use crate::session::session::SessionStatus;

/// Message broadcast to remote observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteMessage {
    /// Input delivered to the session, echoed to non-originating observers.
    InputEcho {
        session_id: String,
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// A captured output record, forwarded verbatim.
    Output {
        session_id: String,
        record: OutputRecord,
    },
    /// A session status change.
    Status {
        session_id: String,
        status: SessionStatus,
        exit_code: Option<i32>,
        signal: Option<i32>,
        timestamp: DateTime<Utc>,
    },
    /// A session-level error.
    Error {
        session_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl RemoteMessage {
    /// The session this message concerns.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::InputEcho { session_id, .. }
            | Self::Output { session_id, .. }
            | Self::Status { session_id, .. }
            | Self::Error { session_id, .. } => session_id,
        }
    }
}

/// Out-of-process delivery to a single observer.
pub trait RemoteTransport: Send + Sync {
    /// Deliver a message to one observer. Fire-and-forget.
    fn deliver(&self, observer_id: &str, message: &RemoteMessage);
}

/// Transport that drops everything (observers disabled).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

impl RemoteTransport for NullTransport {
    fn deliver(&self, observer_id: &str, message: &RemoteMessage) {
        tracing::trace!(
            observer = observer_id,
            session = message.session_id(),
            "dropping remote message (null transport)"
        );
    }
}

/// Transport that buffers messages in memory.
///
/// Useful for polling clients and for inspecting fan-out in tests.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    messages: Mutex<Vec<(String, RemoteMessage)>>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything delivered so far.
    #[must_use]
    pub fn take_messages(&self) -> Vec<(String, RemoteMessage)> {
        match self.messages.lock() {
            Ok(mut messages) => std::mem::take(&mut *messages),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RemoteTransport for MemoryTransport {
    fn deliver(&self, observer_id: &str, message: &RemoteMessage) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((observer_id.to_string(), message.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_serialize_with_a_type_tag() {
        let message = RemoteMessage::Status {
            session_id: "s1".to_string(),
            status: SessionStatus::Running,
            exit_code: None,
            signal: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""status":"running""#));

        let parsed: RemoteMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session_id(), "s1");
    }

    #[test]
    fn memory_transport_buffers_in_order() {
        let transport = MemoryTransport::new();
        let message = RemoteMessage::Error {
            session_id: "s1".to_string(),
            message: "boom".to_string(),
            timestamp: Utc::now(),
        };
        transport.deliver("alice", &message);
        transport.deliver("bob", &message);
        let messages = transport.take_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, "alice");
        assert_eq!(messages[1].0, "bob");
        assert!(transport.is_empty());
    }
}
