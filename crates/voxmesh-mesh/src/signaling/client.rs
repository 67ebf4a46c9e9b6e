//! Public handle for the WebSocket signaling connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use voxmesh_common::SignalingError;

use super::connection::connection_loop;
use super::transport::{SignalingTransport, TransportEvent};
use super::types::{SignalingCommand, SignalingConfig};
use crate::protocol::SignalMessage;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// WebSocket transport to a signaling relay.
///
/// The connection runs in a background task that reconnects with
/// exponential backoff until [`disconnect`](Self::disconnect) is called.
pub struct WsSignalingClient {
    command_tx: mpsc::Sender<SignalingCommand>,
    connected: Arc<RwLock<bool>>,
    stopped: Arc<AtomicBool>,
}

impl WsSignalingClient {
    /// Start the background connection. Must be called inside a tokio
    /// runtime. Returns `(client, event_receiver)`.
    pub fn connect(config: SignalingConfig) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(256);
        let connected = Arc::new(RwLock::new(false));
        let stopped = Arc::new(AtomicBool::new(false));

        tokio::spawn(connection_loop(
            config,
            Arc::clone(&connected),
            Arc::clone(&stopped),
            event_tx,
            command_rx,
        ));

        let client = Self {
            command_tx,
            connected,
            stopped,
        };
        (client, event_rx)
    }

    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Close the socket and stop reconnecting.
    pub async fn disconnect(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(SignalingCommand::Disconnect).await;
    }
}

#[async_trait]
impl SignalingTransport for WsSignalingClient {
    async fn send(&self, message: SignalMessage) -> Result<(), SignalingError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SignalingError::Closed);
        }
        if !self.is_connected().await {
            return Err(SignalingError::NotConnected);
        }
        let json = message.to_json()?;
        self.command_tx
            .send(SignalingCommand::Send(json))
            .await
            .map_err(|_| SignalingError::Closed)
    }
}
