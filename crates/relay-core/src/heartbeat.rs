//! Per-connection keepalive loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broadcast::Broadcaster;
use crate::errors::DeliveryError;
use crate::ids::ClientId;

/// Why a heartbeat loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client was no longer registered at a tick.
    RecipientGone,
    /// A heartbeat write failed; the client has been removed.
    WriteFailed,
    /// The loop was cancelled externally.
    Cancelled,
}

/// Push a heartbeat to `client_id` every `interval` until it goes away.
///
/// The first heartbeat is sent one full `interval` after the call. The loop
/// holds only the id, never the endpoint, so it does not keep a removed
/// client's queue open.
pub async fn run_heartbeat(
    broadcaster: Arc<Broadcaster>,
    client_id: ClientId,
    interval: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let _ = ticker.tick().await;

    let result = loop {
        tokio::select! {
            _ = ticker.tick() => {
                match broadcaster.heartbeat(&client_id) {
                    Ok(()) => {}
                    Err(DeliveryError::NotRegistered) => break HeartbeatResult::RecipientGone,
                    Err(DeliveryError::Closed | DeliveryError::Full) => {
                        break HeartbeatResult::WriteFailed;
                    }
                }
            }
            () = cancel.cancelled() => break HeartbeatResult::Cancelled,
        }
    };
    debug!(client_id = %client_id, ?result, "heartbeat stopped");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClientRegistry;
    use crate::vocabulary::EventVocabulary;

    fn broadcaster(send_queue: usize) -> Arc<Broadcaster> {
        Arc::new(Broadcaster::new(
            Arc::new(ClientRegistry::new(send_queue)),
            Arc::new(EventVocabulary::default()),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_arrive_each_interval() {
        let bc = broadcaster(8);
        let mut a = bc.registry().admit();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_heartbeat(
            Arc::clone(&bc),
            a.id.clone(),
            Duration::from_secs(30),
            cancel.clone(),
        ));

        for _ in 0..3 {
            let frame = a.outbound.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(value["kind"], "heartbeat");
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_sent_before_first_interval() {
        let bc = broadcaster(8);
        let mut a = bc.registry().admit();
        let cancel = CancellationToken::new();

        let _handle = tokio::spawn(run_heartbeat(
            Arc::clone(&bc),
            a.id.clone(),
            Duration::from_secs(30),
            cancel.clone(),
        ));

        time::sleep(Duration::from_secs(29)).await;
        assert!(a.outbound.try_recv().is_err());
        time::sleep(Duration::from_secs(2)).await;
        assert!(a.outbound.try_recv().is_ok());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_client_removed() {
        let bc = broadcaster(8);
        let a = bc.registry().admit();
        let handle = tokio::spawn(run_heartbeat(
            Arc::clone(&bc),
            a.id.clone(),
            Duration::from_secs(1),
            CancellationToken::new(),
        ));

        assert!(bc.registry().remove(&a.id));
        assert_eq!(handle.await.unwrap(), HeartbeatResult::RecipientGone);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_and_removes_on_write_failure() {
        let bc = broadcaster(8);
        let a = bc.registry().admit();
        let id = a.id.clone();
        drop(a.outbound);

        let result = run_heartbeat(
            Arc::clone(&bc),
            id.clone(),
            Duration::from_secs(1),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::WriteFailed);
        assert!(!bc.registry().contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_counts_as_write_failure() {
        let bc = broadcaster(1);
        let a = bc.registry().admit();

        let result = run_heartbeat(
            Arc::clone(&bc),
            a.id.clone(),
            Duration::from_secs(1),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::WriteFailed);
        assert!(bc.registry().is_empty());
    }

    #[tokio::test]
    async fn cancelled_immediately() {
        let bc = broadcaster(8);
        let a = bc.registry().admit();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_heartbeat(
            Arc::clone(&bc),
            a.id.clone(),
            Duration::from_secs(100),
            cancel,
        )
        .await;
        assert_eq!(result, HeartbeatResult::Cancelled);
        assert!(bc.registry().contains(&a.id));
    }
}
