//! In-process signaling relay.
//!
//! Runs several clients against one [`RoomRouter`] without sockets, for
//! demos and multi-session tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use voxmesh_common::{ChannelId, PeerId, SignalingError};

use super::router::{Delivery, RoomRouter};
use super::transport::{SignalingTransport, TransportEvent};
use crate::protocol::SignalMessage;

const DEFAULT_MAX_PEERS: usize = 8;

struct HubState {
    router: RoomRouter,
    clients: HashMap<PeerId, mpsc::Sender<TransportEvent>>,
    /// Links dropped by [`LoopbackHub::disconnect`], kept for `reconnect`.
    detached: HashMap<PeerId, mpsc::Sender<TransportEvent>>,
}

impl HubState {
    async fn deliver(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            match self.clients.get(&delivery.to) {
                Some(tx) => {
                    let _ = tx.send(TransportEvent::Message(delivery.message)).await;
                }
                None => debug!(to = %delivery.to, "dropping delivery for disconnected peer"),
            }
        }
    }
}

#[derive(Clone)]
pub struct LoopbackHub {
    inner: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::with_max_peers(DEFAULT_MAX_PEERS)
    }

    pub fn with_max_peers(max_peers: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubState {
                router: RoomRouter::new(max_peers),
                clients: HashMap::new(),
                detached: HashMap::new(),
            })),
        }
    }

    /// Attach a client. The receiver starts with `TransportEvent::Connected`.
    /// Connecting an id that is already attached replaces the old client.
    pub async fn connect(&self, peer: PeerId) -> (LoopbackTransport, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let _ = tx.send(TransportEvent::Connected).await;

        let mut state = self.inner.lock().await;
        state.detached.remove(&peer);
        state.clients.insert(peer.clone(), tx);

        let transport = LoopbackTransport {
            peer,
            hub: self.clone(),
        };
        (transport, rx)
    }

    /// Drop a client's connection as if its socket died: the rest of its
    /// channel sees `peer-left` and the client sees `Disconnected`.
    pub async fn disconnect(&self, peer: &PeerId) {
        let mut state = self.inner.lock().await;
        let deliveries = state.router.disconnect(peer);
        if let Some(tx) = state.clients.remove(peer) {
            let _ = tx.send(TransportEvent::Disconnected).await;
            state.detached.insert(peer.clone(), tx);
        }
        state.deliver(deliveries).await;
    }

    /// Restore a link dropped by [`disconnect`](Self::disconnect), the way a
    /// reconnecting socket client would: same transport, same event stream,
    /// which sees `Connected` again. Channel membership is not restored.
    pub async fn reconnect(&self, peer: &PeerId) -> bool {
        let mut state = self.inner.lock().await;
        let Some(tx) = state.detached.remove(peer) else {
            return false;
        };
        let _ = tx.send(TransportEvent::Connected).await;
        state.clients.insert(peer.clone(), tx);
        true
    }

    pub async fn members(&self, channel: &ChannelId) -> Vec<PeerId> {
        self.inner.lock().await.router.members(channel)
    }

    async fn dispatch(&self, sender: &PeerId, message: SignalMessage) -> Result<(), SignalingError> {
        let mut state = self.inner.lock().await;
        if !state.clients.contains_key(sender) {
            return Err(SignalingError::NotConnected);
        }
        let deliveries = state.router.route(sender, message);
        state.deliver(deliveries).await;
        Ok(())
    }
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One client's handle on a [`LoopbackHub`].
#[derive(Clone)]
pub struct LoopbackTransport {
    peer: PeerId,
    hub: LoopbackHub,
}

impl LoopbackTransport {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer
    }
}

#[async_trait]
impl SignalingTransport for LoopbackTransport {
    async fn send(&self, message: SignalMessage) -> Result<(), SignalingError> {
        self.hub.dispatch(&self.peer, message).await
    }
}
