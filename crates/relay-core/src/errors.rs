//! Error types shared by the relay core.

use thiserror::Error;

/// A submission the relay refuses to broadcast because of its shape.
///
/// These are reported back to the submitter; they never reach other clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// Body was not JSON, not an object, or had an ill-typed field.
    #[error("malformed submission: {0}")]
    Malformed(String),
    /// The object had no `eventKind`.
    #[error("submission is missing `eventKind`")]
    MissingEventKind,
}

impl SubmitError {
    /// Wire code sent to the client.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "MALFORMED_SUBMISSION",
            Self::MissingEventKind => "MISSING_EVENT_KIND",
        }
    }
}

/// Why a write to one endpoint failed.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The transport task reading the endpoint is gone.
    #[error("endpoint closed")]
    Closed,
    /// The endpoint's queue is full; the recipient is not keeping up.
    #[error("endpoint queue full")]
    Full,
    /// No endpoint is registered under the id.
    #[error("endpoint not registered")]
    NotRegistered,
}

impl DeliveryError {
    /// Short classification string for logging/metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Full => "full",
            Self::NotRegistered => "not_registered",
        }
    }
}
