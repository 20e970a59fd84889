//! Registry of connected clients.
//!
//! All admissions, removals and snapshots go through one `RwLock`. Critical
//! sections never await and never write to a transport, so a broadcast
//! always sees either the whole of a concurrent admit/remove or none of it.
//!
//! [`ClientRegistry::drain`] is terminal: it closes every endpoint behind a
//! farewell frame and turns later admissions away with that same frame.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use relay_telemetry::metrics::{CONNECTIONS_ACTIVE, DISCONNECTIONS_TOTAL};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

use crate::errors::DeliveryError;
use crate::ids::ClientId;
use crate::messages::Frame;

/// Default depth of each endpoint's outbound queue.
pub const DEFAULT_SEND_QUEUE: usize = 256;

/// Write handle for one connected client.
///
/// Holds the sending half of the queue drained by the connection's
/// transport task. The registry owns the only long-lived `Arc` to each
/// endpoint, so removing the entry closes the queue and ends the transport
/// task once it has flushed what was already queued.
///
/// Once [`closed`](Self::close), every write fails with
/// [`DeliveryError::Closed`], even through an `Arc` taken from an older
/// snapshot.
#[derive(Debug)]
pub struct Endpoint {
    id: ClientId,
    tx: Mutex<Option<mpsc::Sender<Frame>>>,
    connected_at: Instant,
}

impl Endpoint {
    /// Id this endpoint is registered under.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Queue a frame without waiting.
    pub fn send(&self, frame: Frame) -> Result<(), DeliveryError> {
        let tx = self.tx.lock();
        let tx = tx.as_ref().ok_or(DeliveryError::Closed)?;
        tx.try_send(frame).map_err(delivery_error)
    }

    /// Queue `farewell` as the last frame and close the queue.
    ///
    /// Closing twice is a no-op that reports `Closed`.
    pub fn close(&self, farewell: Option<Frame>) -> Result<(), DeliveryError> {
        let tx = self.tx.lock().take().ok_or(DeliveryError::Closed)?;
        match farewell {
            Some(frame) => tx.try_send(frame).map_err(delivery_error),
            None => Ok(()),
        }
    }

    /// Time since admission.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

fn delivery_error(e: TrySendError<Frame>) -> DeliveryError {
    match e {
        TrySendError::Full(_) => DeliveryError::Full,
        TrySendError::Closed(_) => DeliveryError::Closed,
    }
}

/// A freshly admitted client: its id and the queue its transport drains.
#[derive(Debug)]
pub struct Admission {
    /// Id the client was admitted under.
    pub id: ClientId,
    /// Frames to write to the client, in order.
    pub outbound: mpsc::Receiver<Frame>,
}

#[derive(Debug, Default)]
struct Clients {
    map: HashMap<ClientId, Arc<Endpoint>>,
    /// Set by `drain`; admissions are refused from then on.
    closed: bool,
    farewell: Option<Frame>,
}

/// Process-wide map of `ClientId` → [`Endpoint`].
#[derive(Debug)]
pub struct ClientRegistry {
    clients: RwLock<Clients>,
    send_queue: usize,
}

impl ClientRegistry {
    /// Create an empty registry whose endpoints queue up to `send_queue` frames.
    pub fn new(send_queue: usize) -> Self {
        Self {
            clients: RwLock::new(Clients::default()),
            send_queue: send_queue.max(1),
        }
    }

    /// Admit a client with no greeting frame.
    pub fn admit(&self) -> Admission {
        self.admit_with_greeting(|_| None)
    }

    /// Admit a client, queueing `greeting(id)` as its first frame.
    ///
    /// The greeting is queued before the entry is published, so no broadcast
    /// can overtake it. After [`drain`](Self::drain) the client is not
    /// registered: its queue holds only the farewell frame and is closed.
    pub fn admit_with_greeting(
        &self,
        greeting: impl FnOnce(&ClientId) -> Option<Frame>,
    ) -> Admission {
        let (tx, outbound) = mpsc::channel(self.send_queue);

        let mut clients = self.clients.write();
        let mut id = ClientId::new();
        while clients.map.contains_key(&id) {
            id = ClientId::new();
        }
        if clients.closed {
            if let Some(frame) = clients.farewell.clone() {
                let _ = tx.try_send(frame);
            }
            drop(clients);
            debug!(client_id = %id, "admission refused, registry drained");
            return Admission { id, outbound };
        }
        if let Some(frame) = greeting(&id) {
            // The queue is fresh and non-empty capacity is guaranteed.
            let _ = tx.try_send(frame);
        }
        let endpoint = Arc::new(Endpoint {
            id: id.clone(),
            tx: Mutex::new(Some(tx)),
            connected_at: Instant::now(),
        });
        let _ = clients.map.insert(id.clone(), endpoint);
        let count = clients.map.len();
        drop(clients);

        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        info!(client_id = %id, connected = count, "client admitted");
        Admission { id, outbound }
    }

    /// Remove a client. Removing an absent id is a no-op.
    ///
    /// Returns whether an entry was removed.
    pub fn remove(&self, id: &ClientId) -> bool {
        let removed = self.clients.write().map.remove(id);
        match removed {
            Some(endpoint) => {
                gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                counter!(DISCONNECTIONS_TOTAL).increment(1);
                info!(
                    client_id = %id,
                    connected_secs = endpoint.age().as_secs(),
                    "client removed"
                );
                true
            }
            None => {
                debug!(client_id = %id, "remove of unknown client ignored");
                false
            }
        }
    }

    /// Point-in-time copy of every registered endpoint.
    pub fn snapshot(&self) -> Vec<Arc<Endpoint>> {
        self.clients.read().map.values().cloned().collect()
    }

    /// Look up one endpoint.
    pub fn get(&self, id: &ClientId) -> Option<Arc<Endpoint>> {
        self.clients.read().map.get(id).cloned()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.read().map.contains_key(id)
    }

    /// Write one frame to one client, removing it if the write fails.
    pub fn send_to(&self, id: &ClientId, frame: Frame) -> Result<(), DeliveryError> {
        let endpoint = self.get(id).ok_or(DeliveryError::NotRegistered)?;
        endpoint.send(frame).inspect_err(|_| {
            let _ = self.remove(id);
        })
    }

    /// Take every entry out of the registry at once and close each one
    /// behind `farewell`. Later admissions get only `farewell`.
    ///
    /// Returns the drained endpoints with the result of queueing their
    /// farewell. A second drain returns nothing.
    pub fn drain(
        &self,
        farewell: Option<Frame>,
    ) -> Vec<(Arc<Endpoint>, Result<(), DeliveryError>)> {
        let entries = {
            let mut clients = self.clients.write();
            if !clients.closed {
                clients.closed = true;
                clients.farewell.clone_from(&farewell);
            }
            std::mem::take(&mut clients.map)
        };
        let drained: Vec<_> = entries
            .into_values()
            .map(|endpoint| {
                let result = endpoint.close(farewell.clone());
                (endpoint, result)
            })
            .collect();
        if !drained.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            gauge!(CONNECTIONS_ACTIVE).decrement(drained.len() as f64);
            counter!(DISCONNECTIONS_TOTAL).increment(drained.len() as u64);
        }
        drained
    }

    /// Number of connected clients.
    pub fn len(&self) -> usize {
        self.clients.read().map.len()
    }

    /// Whether no client is connected.
    pub fn is_empty(&self) -> bool {
        self.clients.read().map.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_QUEUE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn frame(s: &str) -> Frame {
        Arc::new(s.to_string())
    }

    #[test]
    fn admit_and_remove() {
        let registry = ClientRegistry::new(32);
        assert_eq!(registry.len(), 0);

        let a = registry.admit();
        let b = registry.admit();
        assert_eq!(registry.len(), 2);
        assert_ne!(a.id, b.id);

        assert!(registry.remove(&a.id));
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(&a.id));

        assert!(registry.remove(&b.id));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ClientRegistry::new(32);
        let a = registry.admit();
        assert!(registry.remove(&a.id));
        assert!(!registry.remove(&a.id));
        assert!(!registry.remove(&ClientId::new()));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn admitted_ids_are_unique() {
        let registry = ClientRegistry::new(1);
        let mut seen = HashSet::new();
        let mut held = Vec::new();
        for i in 0..500 {
            let admission = registry.admit();
            assert!(seen.insert(admission.id.clone()));
            if i % 2 == 0 {
                let _ = registry.remove(&admission.id);
            } else {
                held.push(admission);
            }
        }
        assert_eq!(registry.len(), 250);
    }

    #[tokio::test]
    async fn greeting_is_first_frame() {
        let registry = ClientRegistry::new(4);
        let mut admission =
            registry.admit_with_greeting(|id| Some(frame(&format!("hello {id}"))));
        registry.send_to(&admission.id, frame("second")).unwrap();

        let first = admission.outbound.recv().await.unwrap();
        assert_eq!(*first, format!("hello {}", admission.id));
        assert_eq!(*admission.outbound.recv().await.unwrap(), "second");
    }

    #[test]
    fn snapshot_is_a_copy() {
        let registry = ClientRegistry::new(4);
        let a = registry.admit();
        let snapshot = registry.snapshot();
        let _b = registry.admit();
        assert!(registry.remove(&a.id));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), &a.id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn send_to_unknown_client() {
        let registry = ClientRegistry::new(4);
        assert_eq!(
            registry.send_to(&ClientId::new(), frame("x")),
            Err(DeliveryError::NotRegistered)
        );
    }

    #[test]
    fn send_to_closed_endpoint_removes_it() {
        let registry = ClientRegistry::new(4);
        let a = registry.admit();
        drop(a.outbound);

        assert_eq!(registry.send_to(&a.id, frame("x")), Err(DeliveryError::Closed));
        assert!(!registry.contains(&a.id));
    }

    #[test]
    fn send_to_full_endpoint_removes_it() {
        let registry = ClientRegistry::new(1);
        let a = registry.admit();
        registry.send_to(&a.id, frame("1")).unwrap();

        assert_eq!(registry.send_to(&a.id, frame("2")), Err(DeliveryError::Full));
        assert!(!registry.contains(&a.id));
    }

    #[tokio::test]
    async fn removal_closes_the_queue_after_flush() {
        let registry = ClientRegistry::new(4);
        let mut a = registry.admit();
        registry.send_to(&a.id, frame("last words")).unwrap();
        assert!(registry.remove(&a.id));

        assert_eq!(*a.outbound.recv().await.unwrap(), "last words");
        assert!(a.outbound.recv().await.is_none());
    }

    #[test]
    fn drain_empties_registry() {
        let registry = ClientRegistry::new(4);
        let _a = registry.admit();
        let _b = registry.admit();

        let drained = registry.drain(None);
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|(_, result)| result.is_ok()));
        assert!(registry.is_empty());
        assert!(registry.drain(None).is_empty());
    }

    #[tokio::test]
    async fn drain_closes_queue_behind_farewell() {
        let registry = ClientRegistry::new(4);
        let mut a = registry.admit();
        registry.send_to(&a.id, frame("before")).unwrap();
        let _ = registry.drain(Some(frame("bye")));

        assert_eq!(*a.outbound.recv().await.unwrap(), "before");
        assert_eq!(*a.outbound.recv().await.unwrap(), "bye");
        assert!(a.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn stale_snapshot_cannot_write_after_drain() {
        let registry = ClientRegistry::new(4);
        let mut a = registry.admit();
        let snapshot = registry.snapshot();
        let _ = registry.drain(Some(frame("bye")));

        assert_eq!(snapshot[0].send(frame("late")), Err(DeliveryError::Closed));
        assert_eq!(*a.outbound.recv().await.unwrap(), "bye");
        assert!(a.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn admission_after_drain_gets_only_farewell() {
        let registry = ClientRegistry::new(4);
        let _ = registry.drain(Some(frame("bye")));

        let mut late = registry.admit_with_greeting(|_| Some(frame("hello")));
        assert!(!registry.contains(&late.id));
        assert!(registry.is_empty());
        assert_eq!(*late.outbound.recv().await.unwrap(), "bye");
        assert!(late.outbound.recv().await.is_none());
    }

    #[test]
    fn second_drain_keeps_first_farewell() {
        let registry = ClientRegistry::new(4);
        let _ = registry.drain(Some(frame("first")));
        let _ = registry.drain(Some(frame("second")));

        let mut late = registry.admit();
        assert_eq!(*late.outbound.try_recv().unwrap(), "first");
    }

    #[test]
    fn close_is_idempotent() {
        let registry = ClientRegistry::new(4);
        let a = registry.admit();
        let endpoint = registry.get(&a.id).unwrap();
        assert_eq!(endpoint.close(None), Ok(()));
        assert_eq!(endpoint.close(None), Err(DeliveryError::Closed));
        assert_eq!(endpoint.send(frame("x")), Err(DeliveryError::Closed));
    }

    #[test]
    fn zero_send_queue_is_clamped() {
        let registry = ClientRegistry::new(0);
        let a = registry.admit();
        assert!(registry.send_to(&a.id, frame("x")).is_ok());
    }
}
