//! Server-sent-events transport.
//!
//! `GET /events` admits a listening client and streams its frames as SSE
//! `data:` lines. `POST /events` is the matching submit side: the body is a
//! submission and `senderId` names the listener to exclude.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use relay_core::{Admission, ClientId, Relay, SubmitError, SubmitOutcome};
use serde::Serialize;
use tokio_util::sync::DropGuard;
use tracing::debug;

use crate::server::AppState;

/// Removes the listener when its response stream is dropped.
struct Listener {
    relay: Arc<Relay>,
    id: ClientId,
    _heartbeat: DropGuard,
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.relay.disconnect(&self.id);
        debug!(client_id = %self.id, "event stream closed");
    }
}

/// GET /events
pub async fn subscribe(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let Admission { id, mut outbound } = state.relay.connect();
    debug!(client_id = %id, "event stream opened");

    let heartbeat_cancel = state.shutdown.child_token();
    if state.config.heartbeat.event_stream {
        let _ = state.relay.spawn_heartbeat(
            id.clone(),
            state.config.heartbeat_interval(),
            heartbeat_cancel.clone(),
        );
    }
    let listener = Listener {
        relay: Arc::clone(&state.relay),
        id,
        _heartbeat: heartbeat_cancel.drop_guard(),
    };

    let stream = async_stream::stream! {
        let _listener = listener;
        while let Some(frame) = outbound.recv().await {
            yield Ok(Event::default().data(frame.as_str()));
        }
    };
    Sse::new(stream)
}

/// Body of a `202` from `POST /events`.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitResponse {
    /// The event was fanned out.
    Broadcast {
        /// Recipients a write was attempted for.
        attempted: usize,
        /// Recipients whose write was queued.
        delivered: usize,
    },
    /// The kind is not supported; nothing was sent.
    Ignored {
        /// The unsupported kind.
        #[serde(rename = "eventKind")]
        event_kind: String,
    },
}

impl From<SubmitOutcome> for SubmitResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Broadcast(report) => Self::Broadcast {
                attempted: report.attempted(),
                delivered: report.delivered(),
            },
            SubmitOutcome::Ignored { event_kind } => Self::Ignored { event_kind },
        }
    }
}

/// Body of a `400` from `POST /events`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: &'static str,
    /// Human-readable detail.
    pub message: String,
}

impl From<&SubmitError> for ErrorBody {
    fn from(error: &SubmitError) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

/// POST /events
pub async fn submit(State(state): State<AppState>, body: String) -> Response {
    match state.relay.submit(None, &body) {
        Ok(outcome) => (StatusCode::ACCEPTED, Json(SubmitResponse::from(outcome))).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(ErrorBody::from(&e))).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{BroadcastReport, Delivery, DeliveryError};
    use serde_json::json;

    #[test]
    fn broadcast_response_shape() {
        let report = BroadcastReport {
            event_kind: "user_message".into(),
            deliveries: vec![
                Delivery {
                    client_id: ClientId::from_raw("client_a"),
                    result: Ok(()),
                },
                Delivery {
                    client_id: ClientId::from_raw("client_b"),
                    result: Err(DeliveryError::Closed),
                },
            ],
        };
        let body = SubmitResponse::from(SubmitOutcome::Broadcast(report));
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({"status": "broadcast", "attempted": 2, "delivered": 1})
        );
    }

    #[test]
    fn ignored_response_shape() {
        let body = SubmitResponse::from(SubmitOutcome::Ignored {
            event_kind: "unsupported_event".into(),
        });
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({"status": "ignored", "eventKind": "unsupported_event"})
        );
    }

    #[test]
    fn error_body_shape() {
        let body = ErrorBody::from(&SubmitError::MissingEventKind);
        let value = serde_json::to_value(body).unwrap();
        assert_eq!(value["code"], "MISSING_EVENT_KIND");
        assert!(value["message"].as_str().unwrap().contains("eventKind"));
    }
}
