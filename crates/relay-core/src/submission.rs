//! Decoding of inbound event submissions.
//!
//! Shape: `{ "senderId"?: string, "eventKind": string, "payload"?: object }`.
//! Decoding only checks structure; whether the kind is allowed is decided by
//! the [`Broadcaster`](crate::Broadcaster).

use serde_json::{Map, Value};

use crate::errors::SubmitError;
use crate::ids::ClientId;

/// A structurally valid submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Explicit sender, for transports where the submitter is not the
    /// connection that listens.
    pub sender_id: Option<ClientId>,
    /// Requested event kind, not yet checked against the vocabulary.
    pub event_kind: String,
    /// Opaque payload, always a JSON object; `{}` when the client sent none.
    pub payload: Value,
}

impl Submission {
    /// Parse raw text and validate its structure.
    pub fn decode(raw: &str) -> Result<Self, SubmitError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| SubmitError::Malformed(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Validate an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, SubmitError> {
        let Value::Object(mut fields) = value else {
            return Err(SubmitError::Malformed(format!(
                "expected a JSON object, got {}",
                type_name(&value)
            )));
        };

        let event_kind = match fields.remove("eventKind") {
            None | Some(Value::Null) => return Err(SubmitError::MissingEventKind),
            Some(Value::String(kind)) => kind,
            Some(other) => {
                return Err(SubmitError::Malformed(format!(
                    "`eventKind` must be a string, got {}",
                    type_name(&other)
                )))
            }
        };

        let sender_id = match fields.remove("senderId") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(ClientId::from_raw(id)),
            Some(other) => {
                return Err(SubmitError::Malformed(format!(
                    "`senderId` must be a string, got {}",
                    type_name(&other)
                )))
            }
        };

        let payload = match fields.remove("payload") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(payload @ Value::Object(_)) => payload,
            Some(other) => {
                return Err(SubmitError::Malformed(format!(
                    "`payload` must be an object, got {}",
                    type_name(&other)
                )))
            }
        };

        Ok(Self {
            sender_id,
            event_kind,
            payload,
        })
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
