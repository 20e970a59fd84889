//! Opaque client identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const CLIENT_ID_PREFIX: &str = "client";

/// Identifies one connected client for the lifetime of its connection.
///
/// Generated server-side from a random (v4) UUID so that one client cannot
/// predict another's id. Ids are never recycled: once the connection that
/// owns an id is removed from the registry the id is dead.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(format!("{CLIENT_ID_PREFIX}_{}", Uuid::new_v4().simple()))
    }

    /// Wrap an id received from a client (e.g. an explicit `senderId`).
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClientId {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn client_id_has_prefix() {
        let id = ClientId::new();
        assert!(id.as_str().starts_with("client_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let ids: HashSet<ClientId> = (0..10_000).map(|_| ClientId::new()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn id_carries_full_uuid_entropy() {
        let id = ClientId::new();
        let suffix = id.as_str().trim_start_matches("client_");
        assert_eq!(suffix.len(), 32);
        assert!(Uuid::parse_str(suffix).is_ok());
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = ClientId::new();
        let parsed: ClientId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = ClientId::from_raw("client_abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"client_abc\"");
    }
}
