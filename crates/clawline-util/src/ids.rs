//! Strongly-typed identifiers for clawline

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a paying participant in the queue.
///
/// Assigned by the payment side (usually the checkout reference), so it is an
/// opaque string rather than a generated UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for one activation of a participant.
///
/// A participant that is requeued and reactivated gets a fresh session id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_id_equality() {
        let a = ParticipantId::new("cs_test_1");
        let b = ParticipantId::from("cs_test_1");
        let c = ParticipantId::new("cs_test_2");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn session_id_uniqueness() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn participant_id_serializes_as_plain_string() {
        let id = ParticipantId::new("cs_live_42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"cs_live_42\"");

        let parsed: ParticipantId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
