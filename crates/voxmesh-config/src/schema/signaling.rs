//! Signaling server connection settings.

use serde::{Deserialize, Serialize};

/// Connection to the signaling relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// WebSocket URL of the relay.
    pub url: String,
    /// Seconds between keep-alive pings (valid range: 5-120).
    pub heartbeat_interval_secs: u64,
    /// Seconds to wait for the WebSocket handshake (valid range: 1-60).
    pub connect_timeout_secs: u64,
    /// First reconnect delay in seconds; doubles on every failed attempt.
    pub reconnect_delay_secs: u64,
    /// Upper bound for the reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".into(),
            heartbeat_interval_secs: 25,
            connect_timeout_secs: 15,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        }
    }
}
