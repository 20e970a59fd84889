//! Sender-excluding event fan-out.

use std::sync::Arc;

use metrics::counter;
use relay_telemetry::metrics::{
    DELIVERIES_TOTAL, DELIVERY_FAILURES_TOTAL, HEARTBEATS_TOTAL, SUBMISSIONS_TOTAL,
};
use tracing::{debug, trace, warn};

use crate::errors::{DeliveryError, SubmitError};
use crate::ids::ClientId;
use crate::messages::{EventEnvelope, Frame, ServerMessage};
use crate::registry::ClientRegistry;
use crate::submission::Submission;
use crate::vocabulary::EventVocabulary;

/// Result of writing one envelope to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Recipient.
    pub client_id: ClientId,
    /// `Err` means the recipient was removed from the registry.
    pub result: Result<(), DeliveryError>,
}

/// Per-recipient results of one fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Kind that was broadcast.
    pub event_kind: String,
    /// One entry per recipient in the snapshot, sender excluded.
    pub deliveries: Vec<Delivery>,
}

impl BroadcastReport {
    /// Recipients a write was attempted for.
    pub fn attempted(&self) -> usize {
        self.deliveries.len()
    }

    /// Recipients whose write was queued.
    pub fn delivered(&self) -> usize {
        self.deliveries.iter().filter(|d| d.result.is_ok()).count()
    }

    /// Recipients removed because their write failed.
    pub fn removed(&self) -> impl Iterator<Item = &ClientId> {
        self.deliveries
            .iter()
            .filter(|d| d.result.is_err())
            .map(|d| &d.client_id)
    }
}

/// What became of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The kind was allowed and the event was fanned out.
    Broadcast(BroadcastReport),
    /// The kind is not in the vocabulary; nothing was sent.
    Ignored {
        /// The unrecognised kind.
        event_kind: String,
    },
}

/// Validates submissions and writes them to every registered client except
/// the sender.
#[derive(Debug)]
pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
    vocabulary: Arc<EventVocabulary>,
}

impl Broadcaster {
    /// Create a broadcaster over a registry and vocabulary.
    pub fn new(registry: Arc<ClientRegistry>, vocabulary: Arc<EventVocabulary>) -> Self {
        Self {
            registry,
            vocabulary,
        }
    }

    /// The registry recipients are drawn from.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Decode, validate and fan out a raw submission.
    ///
    /// `sender` is the connection-bound sender, if the transport has one; it
    /// takes precedence over a `senderId` in the body.
    pub fn submit(
        &self,
        sender: Option<&ClientId>,
        raw: &str,
    ) -> Result<SubmitOutcome, SubmitError> {
        let submission = Submission::decode(raw).inspect_err(|e| {
            counter!(SUBMISSIONS_TOTAL, "outcome" => "rejected").increment(1);
            warn!(
                sender = sender.map(ClientId::as_str),
                code = e.code(),
                error = %e,
                "rejected submission"
            );
        })?;
        Ok(self.submit_decoded(sender, submission))
    }

    fn submit_decoded(
        &self,
        sender: Option<&ClientId>,
        submission: Submission,
    ) -> SubmitOutcome {
        let sender = sender.cloned().or(submission.sender_id);

        if !self.vocabulary.contains(&submission.event_kind) {
            counter!(SUBMISSIONS_TOTAL, "outcome" => "ignored").increment(1);
            warn!(
                sender = sender.as_ref().map(ClientId::as_str),
                event_kind = %submission.event_kind,
                "dropping unsupported event kind"
            );
            return SubmitOutcome::Ignored {
                event_kind: submission.event_kind,
            };
        }

        counter!(SUBMISSIONS_TOTAL, "outcome" => "broadcast").increment(1);
        let envelope = EventEnvelope::new(submission.event_kind, submission.payload);
        SubmitOutcome::Broadcast(self.fan_out(&envelope, sender.as_ref()))
    }

    /// Write `envelope` to every registered client except `exclude`.
    ///
    /// Writes never wait, so a stalled recipient cannot hold up the others.
    /// Recipients whose write fails are removed once every write has been
    /// attempted.
    pub fn fan_out(&self, envelope: &EventEnvelope, exclude: Option<&ClientId>) -> BroadcastReport {
        let mut report = BroadcastReport {
            event_kind: envelope.event_kind.clone(),
            deliveries: Vec::new(),
        };
        let Some(frame) = encode(&envelope.to_message()) else {
            return report;
        };

        report.deliveries = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|endpoint| Some(endpoint.id()) != exclude)
            .map(|endpoint| Delivery {
                client_id: endpoint.id().clone(),
                result: endpoint.send(Arc::clone(&frame)),
            })
            .collect();

        for delivery in &report.deliveries {
            match delivery.result {
                Ok(()) => counter!(DELIVERIES_TOTAL).increment(1),
                Err(e) => {
                    counter!(DELIVERY_FAILURES_TOTAL, "reason" => e.reason())
                        .increment(1);
                    warn!(
                        client_id = %delivery.client_id,
                        event_kind = %envelope.event_kind,
                        error = %e,
                        "delivery failed, removing recipient"
                    );
                    let _ = self.registry.remove(&delivery.client_id);
                }
            }
        }

        debug!(
            event_kind = %envelope.event_kind,
            sender = exclude.map(ClientId::as_str),
            recipients = report.attempted(),
            delivered = report.delivered(),
            "broadcast event"
        );
        report
    }

    /// Push a no-op heartbeat to one client.
    ///
    /// A failed write removes the client, like any other delivery failure.
    pub fn heartbeat(&self, id: &ClientId) -> Result<(), DeliveryError> {
        let Some(frame) = encode(&ServerMessage::heartbeat()) else {
            return Ok(());
        };
        match self.registry.send_to(id, frame) {
            Ok(()) => {
                counter!(HEARTBEATS_TOTAL).increment(1);
                trace!(client_id = %id, "sent heartbeat");
                Ok(())
            }
            Err(e) => {
                if e != DeliveryError::NotRegistered {
                    counter!(DELIVERY_FAILURES_TOTAL, "reason" => e.reason())
                        .increment(1);
                    warn!(client_id = %id, error = %e, "heartbeat failed, client removed");
                }
                Err(e)
            }
        }
    }
}

/// Serialize a message, logging the (unexpected) failure.
pub(crate) fn encode(message: &ServerMessage) -> Option<Frame> {
    match message.encode() {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, "failed to serialize server message");
            None
        }
    }
}
