//! Wire shapes exchanged with clients.
//!
//! Everything the relay writes to an endpoint is a [`ServerMessage`]
//! serialized once to JSON text and shared between recipients as a [`Frame`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ClientId;

/// One pre-serialized text frame, shared by every recipient of a broadcast.
pub type Frame = Arc<String>;

/// Milliseconds since the Unix epoch, as stamped on outgoing events.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A validated, server-stamped event ready for fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// Member of the allowed vocabulary.
    pub event_kind: String,
    /// Assigned by the relay when the envelope is built.
    pub server_timestamp: i64,
    /// Passed through from the submitter unmodified.
    pub payload: Value,
}

impl EventEnvelope {
    /// Stamp `payload` with the current server time.
    pub fn new(event_kind: impl Into<String>, payload: Value) -> Self {
        Self {
            event_kind: event_kind.into(),
            server_timestamp: now_millis(),
            payload,
        }
    }

    /// The notification delivered to recipients.
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Notification {
            event_kind: self.event_kind.clone(),
            server_timestamp: self.server_timestamp,
            payload: self.payload.clone(),
        }
    }
}

/// Every message the relay pushes to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every connection.
    #[serde(rename_all = "camelCase")]
    Welcome {
        /// Id the client was admitted under.
        client_id: ClientId,
        /// Kinds the client may announce.
        supported_events: Vec<String>,
    },
    /// An event announced by another client.
    #[serde(rename_all = "camelCase")]
    Notification {
        /// Kind of event.
        event_kind: String,
        /// Milliseconds since the Unix epoch.
        server_timestamp: i64,
        /// Submitter's payload.
        payload: Value,
    },
    /// No-op keepalive.
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        /// Milliseconds since the Unix epoch.
        server_timestamp: i64,
    },
    /// The relay is about to close the connection.
    Closing {
        /// Human-readable reason.
        reason: String,
    },
    /// A submission from this client was rejected.
    Error {
        /// Machine-readable code, see [`SubmitError::code`](crate::SubmitError::code).
        code: String,
        /// Human-readable detail.
        message: String,
    },
}

impl ServerMessage {
    /// Welcome for a freshly admitted client.
    pub fn welcome(client_id: &ClientId, supported_events: &[String]) -> Self {
        Self::Welcome {
            client_id: client_id.clone(),
            supported_events: supported_events.to_vec(),
        }
    }

    /// Heartbeat stamped now.
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            server_timestamp: now_millis(),
        }
    }

    /// Closure notice.
    pub fn closing(reason: impl Into<String>) -> Self {
        Self::Closing {
            reason: reason.into(),
        }
    }

    /// Client-facing rejection of a submission.
    pub fn rejection(error: &crate::SubmitError) -> Self {
        Self::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }

    /// Serialize to a shareable text frame.
    pub fn encode(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Arc::new)
    }
}

/// Read-only view of the relay for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    /// Current registry size.
    pub connected_clients: usize,
    /// Allowed vocabulary, declaration order.
    pub supported_events: Vec<String>,
}
