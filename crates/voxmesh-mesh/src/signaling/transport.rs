use async_trait::async_trait;
use voxmesh_common::SignalingError;

use crate::protocol::SignalMessage;

/// Events produced by a signaling transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Message(SignalMessage),
}

/// Outbound half of a signaling transport. The inbound half is the
/// `mpsc::Receiver<TransportEvent>` handed out when the transport is built.
///
/// Messages from one sender to one recipient arrive in order. Nothing else
/// is guaranteed: no deduplication and no ordering across senders.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn send(&self, message: SignalMessage) -> Result<(), SignalingError>;
}
