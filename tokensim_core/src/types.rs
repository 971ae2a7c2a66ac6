//! Identifier types shared across the orchestrator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a scenario configuration.
///
/// Caller-supplied ids are kept verbatim (`"scenario-a"`); generated ids are
/// `scenario-` followed by the first 8 hex digits of a v4 UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioId(pub String);

impl ScenarioId {
    /// Wraps an id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random id.
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self(format!("scenario-{}", &uuid[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScenarioId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ScenarioId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier for a simulation session.
///
/// Uses UUID v4 for global uniqueness without coordination; the server
/// echoes it back on every streamed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a new random SessionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic SessionId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x9e3779b97f4a7c15).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Routing key for streamed events: a session plus the dispatch generation
/// that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    #[serde(rename = "sessionId")]
    pub session: SessionId,
    pub generation: u64,
}

impl StreamKey {
    pub fn new(session: SessionId, generation: u64) -> Self {
        Self { session, generation }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.session, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_scenario_ids_are_distinct() {
        let a = ScenarioId::generate();
        let b = ScenarioId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("scenario-"));
        assert_eq!(a.as_str().len(), "scenario-".len() + 8);
    }

    #[test]
    fn test_stream_key_wire_names() {
        let key = StreamKey::new(SessionId::from_seed(1), 3);
        let value = serde_json::to_value(key).unwrap();
        assert!(value.get("sessionId").is_some());
        assert_eq!(value["generation"], 3);
    }
}
