//! # relay-core
//!
//! Transport-agnostic core of the notification relay.
//!
//! - **Registry**: `ClientId` → outbound queue, admitted and removed atomically
//! - **Vocabulary**: the append-only set of event kinds that may be broadcast
//! - **Broadcaster**: validates submissions and fans them out to everyone but
//!   the sender, removing recipients whose writes fail
//! - **Heartbeat**: optional per-connection keepalive loop
//! - **Relay**: the facade transports talk to (connect, submit, disconnect,
//!   diagnostics, drain)

#![deny(unsafe_code)]

pub mod broadcast;
pub mod errors;
pub mod heartbeat;
pub mod ids;
pub mod messages;
pub mod registry;
pub mod relay;
pub mod submission;
pub mod vocabulary;

pub use broadcast::{BroadcastReport, Broadcaster, Delivery, SubmitOutcome};
pub use errors::{DeliveryError, SubmitError};
pub use heartbeat::{run_heartbeat, HeartbeatResult};
pub use ids::ClientId;
pub use messages::{now_millis, Diagnostics, EventEnvelope, Frame, ServerMessage};
pub use registry::{Admission, ClientRegistry, Endpoint, DEFAULT_SEND_QUEUE};
pub use relay::Relay;
pub use submission::Submission;
pub use vocabulary::{EventVocabulary, DEFAULT_EVENT_KINDS};
