use serde::{Deserialize, Serialize};

/// Configuration for the signaling relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Port to listen on.
    pub port: u16,
    /// Maximum members per voice channel. Every member connects to every
    /// other member, so this stays small.
    pub max_peers: usize,
    /// Seconds a new connection has to send its first message.
    pub handshake_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_peers: 8,
            handshake_timeout_secs: 10,
        }
    }
}
