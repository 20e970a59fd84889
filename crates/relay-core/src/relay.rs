//! Transport-agnostic entry point tying registry, vocabulary and broadcaster
//! together.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use relay_telemetry::metrics::CONNECTIONS_TOTAL;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcast::{encode, Broadcaster, SubmitOutcome};
use crate::errors::{DeliveryError, SubmitError};
use crate::heartbeat::{run_heartbeat, HeartbeatResult};
use crate::ids::ClientId;
use crate::messages::{Diagnostics, ServerMessage};
use crate::registry::{Admission, ClientRegistry};
use crate::vocabulary::EventVocabulary;

/// The relay core. Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct Relay {
    registry: Arc<ClientRegistry>,
    vocabulary: Arc<EventVocabulary>,
    broadcaster: Arc<Broadcaster>,
}

impl Relay {
    /// Create a relay with the given vocabulary and per-client queue depth.
    pub fn new(vocabulary: EventVocabulary, send_queue: usize) -> Self {
        let registry = Arc::new(ClientRegistry::new(send_queue));
        let vocabulary = Arc::new(vocabulary);
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&registry),
            Arc::clone(&vocabulary),
        ));
        Self {
            registry,
            vocabulary,
            broadcaster,
        }
    }

    /// Admit a new client. Its queue starts with the welcome frame.
    pub fn connect(&self) -> Admission {
        counter!(CONNECTIONS_TOTAL).increment(1);
        self.registry.admit_with_greeting(|id| {
            encode(&ServerMessage::welcome(id, self.vocabulary.kinds()))
        })
    }

    /// Handle a submission from `sender` (or from no connection, for
    /// submit-only transports).
    pub fn submit(
        &self,
        sender: Option<&ClientId>,
        raw: &str,
    ) -> Result<SubmitOutcome, SubmitError> {
        self.broadcaster.submit(sender, raw)
    }

    /// Tell one client its submission was rejected.
    pub fn reject(&self, id: &ClientId, error: &SubmitError) -> Result<(), DeliveryError> {
        match encode(&ServerMessage::rejection(error)) {
            Some(frame) => self.registry.send_to(id, frame),
            None => Ok(()),
        }
    }

    /// Remove a client. Idempotent.
    pub fn disconnect(&self, id: &ClientId) -> bool {
        self.registry.remove(id)
    }

    /// Send one heartbeat to one client.
    pub fn heartbeat(&self, id: &ClientId) -> Result<(), DeliveryError> {
        self.broadcaster.heartbeat(id)
    }

    /// Spawn a heartbeat loop for `id` on the current runtime.
    pub fn spawn_heartbeat(
        &self,
        id: ClientId,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<HeartbeatResult> {
        tokio::spawn(run_heartbeat(
            Arc::clone(&self.broadcaster),
            id,
            interval,
            cancel,
        ))
    }

    /// Current registry size and vocabulary.
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            connected_clients: self.registry.len(),
            supported_events: self.vocabulary.kinds().to_vec(),
        }
    }

    /// Number of connected clients.
    pub fn connected_clients(&self) -> usize {
        self.registry.len()
    }

    /// Remove every client, closing each queue behind a closing frame.
    ///
    /// Admission stays closed afterwards: a client that connects later gets
    /// the closing frame and nothing else. Notifications from a broadcast
    /// still in flight never land after the closing frame.
    ///
    /// Returns how many clients were drained. A second call drains nothing.
    pub fn drain(&self, reason: &str) -> usize {
        let drained = self
            .registry
            .drain(encode(&ServerMessage::closing(reason)));
        if drained.is_empty() {
            return 0;
        }

        for (endpoint, result) in &drained {
            if let Err(e) = result {
                warn!(client_id = %endpoint.id(), error = %e, "closing frame not delivered");
            }
        }
        info!(clients = drained.len(), reason, "drained all clients");
        drained.len()
    }

    /// The allowed vocabulary.
    pub fn vocabulary(&self) -> &EventVocabulary {
        &self.vocabulary
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new(EventVocabulary::default(), crate::registry::DEFAULT_SEND_QUEUE)
    }
}
