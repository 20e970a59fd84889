//! WebSocket transport.
//!
//! Every text frame a client sends is a submission; the client's own id is
//! the sender. Rejected submissions come back as an `error` frame to that
//! client only.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relay_core::{Admission, ClientId, Frame, Relay, SubmitError};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::server::AppState;

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.config.max_message_size)
        .max_frame_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Run one WebSocket connection until either side goes away.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let Admission { id, outbound } = state.relay.connect();
    debug!(client_id = %id, "websocket connected");

    let heartbeat_cancel = state.shutdown.child_token();
    if state.config.heartbeat.websocket {
        let _ = state.relay.spawn_heartbeat(
            id.clone(),
            state.config.heartbeat_interval(),
            heartbeat_cancel.clone(),
        );
    }

    let (ws_tx, ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_loop(ws_tx, outbound));
    let mut reader = tokio::spawn(read_loop(ws_rx, Arc::clone(&state.relay), id.clone()));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    heartbeat_cancel.cancel();
    let _ = state.relay.disconnect(&id);
    debug!(client_id = %id, "websocket closed");
}

/// Forward queued frames to the socket. Ends when the queue closes, which
/// happens once the client is removed from the registry.
async fn write_loop(mut ws_tx: SplitSink<WebSocket, Message>, mut outbound: mpsc::Receiver<Frame>) {
    while let Some(frame) = outbound.recv().await {
        if ws_tx.send(Message::Text(String::clone(&frame).into())).await.is_err() {
            return;
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
}

/// Feed inbound text frames to the relay as submissions.
async fn read_loop(mut ws_rx: SplitStream<WebSocket>, relay: Arc<Relay>, id: ClientId) {
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => handle_text(&relay, &id, text.as_str()),
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => handle_text(&relay, &id, text),
                Err(_) => reject(
                    &relay,
                    &id,
                    &SubmitError::Malformed("binary frame is not UTF-8".into()),
                ),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => trace!(client_id = %id, "control frame"),
        }
    }
}

fn handle_text(relay: &Relay, id: &ClientId, text: &str) {
    if let Err(e) = relay.submit(Some(id), text) {
        reject(relay, id, &e);
    }
}

fn reject(relay: &Relay, id: &ClientId, error: &SubmitError) {
    if let Err(e) = relay.reject(id, error) {
        warn!(client_id = %id, error = %e, "could not deliver rejection");
    }
}
