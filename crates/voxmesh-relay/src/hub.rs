//! Shared relay state: connected clients and channel membership.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use voxmesh_common::PeerId;
use voxmesh_mesh::signaling::{Delivery, RoomRouter};
use voxmesh_mesh::SignalMessage;

struct HubState {
    router: RoomRouter,
    clients: HashMap<PeerId, mpsc::Sender<String>>,
}

/// Thread-safe relay hub.
#[derive(Clone)]
pub struct RelayHub {
    inner: Arc<Mutex<HubState>>,
}

impl RelayHub {
    pub fn new(max_peers: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubState {
                router: RoomRouter::new(max_peers),
                clients: HashMap::new(),
            })),
        }
    }

    /// Bind a connection to `peer`. Fails if the id is already connected.
    pub async fn register(
        &self,
        peer: &PeerId,
        tx: mpsc::Sender<String>,
    ) -> Result<(), &'static str> {
        let mut state = self.inner.lock().await;
        if state.clients.contains_key(peer) {
            return Err("peer id already connected");
        }
        state.clients.insert(peer.clone(), tx);
        Ok(())
    }

    /// Route a message from `peer` and hand the results to their recipients.
    pub async fn route(&self, peer: &PeerId, message: SignalMessage) {
        let mut state = self.inner.lock().await;
        let deliveries = state.router.route(peer, message);
        state.deliver(deliveries);
    }

    /// Drop a connection. The rest of its channel sees `peer-left`.
    pub async fn unregister(&self, peer: &PeerId) {
        let mut state = self.inner.lock().await;
        state.clients.remove(peer);
        let deliveries = state.router.disconnect(peer);
        state.deliver(deliveries);
    }

    /// Connected clients and open channels.
    pub async fn counts(&self) -> (usize, usize) {
        let state = self.inner.lock().await;
        (state.clients.len(), state.router.channel_count())
    }
}

impl HubState {
    fn deliver(&self, deliveries: Vec<Delivery>) {
        for Delivery { to, message } in deliveries {
            let Some(tx) = self.clients.get(&to) else {
                continue;
            };
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode message");
                    continue;
                }
            };
            // A client that cannot keep up loses messages rather than
            // stalling the whole relay.
            if let Err(e) = tx.try_send(json) {
                tracing::warn!(peer = %to, kind = message.kind(), error = %e, "Dropping message for slow client");
            }
        }
    }
}
