use serde::{Deserialize, Serialize};
use std::fmt;

use crate::id::new_id;

/// Identifier of a participant in a voice channel.
///
/// Ordering is plain lexicographic string ordering. Both ends of a pair
/// compare the same two ids, so the order is agreed on without any
/// coordination (glare resolution and initiator selection rely on this).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn random() -> Self {
        Self(new_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque handle of a local or remote media stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamHandle(String);

impl StreamHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(new_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_orders_lexicographically() {
        let a = PeerId::from("alice");
        let b = PeerId::from("bob");
        assert!(a < b);
        assert!(PeerId::from("B") < PeerId::from("a"));
        assert!(PeerId::from("peer-10") < PeerId::from("peer-9"));
    }

    #[test]
    fn peer_id_serializes_as_plain_string() {
        let id = PeerId::from("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
        let back: PeerId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn random_peer_ids_differ() {
        assert_ne!(PeerId::random(), PeerId::random());
    }

    #[test]
    fn display_matches_inner_string() {
        assert_eq!(ChannelId::from("voice-1").to_string(), "voice-1");
        assert_eq!(StreamHandle::new("s1").to_string(), "s1");
        let generated = StreamHandle::generate();
        assert_eq!(generated.to_string(), generated.as_str());
    }
}
