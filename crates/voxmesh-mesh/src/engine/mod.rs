//! WebRTC engine contract.
//!
//! The orchestrator drives peer connections only through these traits. The
//! `webrtc-engine` feature provides an implementation on webrtc-rs.

#[cfg(feature = "webrtc-engine")]
mod webrtc;

#[cfg(feature = "webrtc-engine")]
pub use self::webrtc::{RemoteTrack, WebRtcEngine};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use voxmesh_common::{EngineError, PeerId, StreamHandle};
use voxmesh_config::RtcConfig;

use crate::media::LocalTrack;
use crate::protocol::IceCandidate;
use crate::session::SessionCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Transport-level state of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events a peer connection reports back to its session.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    LocalCandidate(IceCandidate),
    Connectivity(Connectivity),
    RemoteStream(StreamHandle),
}

/// Where a connection delivers its events.
///
/// Each sink is stamped with the epoch of the connection it was created
/// for. Events from a connection that has since been replaced are dropped
/// by the session.
#[derive(Clone)]
pub struct EngineEventSink {
    peer: PeerId,
    epoch: u64,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl EngineEventSink {
    pub(crate) fn new(peer: PeerId, epoch: u64, tx: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self { peer, epoch, tx }
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Returns `false` once the session is gone.
    pub fn emit(&self, event: ConnectionEvent) -> bool {
        self.tx
            .send(SessionCommand::Engine {
                peer: self.peer.clone(),
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

impl fmt::Debug for EngineEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineEventSink")
            .field("peer", &self.peer)
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// One WebRTC peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    /// Discard a local offer that has not been answered yet.
    async fn rollback_local_description(&self) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    /// Send `track` on this connection, replacing the track of the same kind
    /// if there is one. Returns `true` if the change needs renegotiation.
    async fn attach_track(&self, track: &LocalTrack) -> Result<bool, EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

#[async_trait]
pub trait RtcEngine: Send + Sync {
    async fn create_connection(
        &self,
        peer: &PeerId,
        config: &RtcConfig,
        events: EngineEventSink,
    ) -> Result<Arc<dyn PeerConnection>, EngineError>;
}
