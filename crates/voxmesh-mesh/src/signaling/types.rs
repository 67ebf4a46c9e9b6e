//! Runtime configuration and commands for the WebSocket signaling client.

use voxmesh_config::VoxmeshConfig;

/// Settings for [`WsSignalingClient`](super::WsSignalingClient).
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Relay URL, e.g. `ws://127.0.0.1:8080/ws`.
    pub url: String,
    /// WebSocket ping interval in seconds (default: 25).
    pub heartbeat_interval_secs: u64,
    /// Handshake timeout in seconds (default: 15).
    pub connect_timeout_secs: u64,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
}

impl SignalingConfig {
    pub fn from_config(config: &VoxmeshConfig) -> Self {
        let s = &config.signaling;
        Self {
            url: s.url.clone(),
            heartbeat_interval_secs: s.heartbeat_interval_secs,
            connect_timeout_secs: s.connect_timeout_secs,
            reconnect_delay_secs: s.reconnect_delay_secs.max(1),
            max_reconnect_delay_secs: s.max_reconnect_delay_secs.max(1),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self::from_config(&VoxmeshConfig::default())
    }
}

/// Commands sent from the client handle to the connection task.
#[derive(Debug)]
pub(crate) enum SignalingCommand {
    /// A pre-encoded text frame.
    Send(String),
    Disconnect,
}
