use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use voxmesh_common::{ChannelId, PeerId, Result, StreamHandle};
use voxmesh_config::{RtcConfig, VoxmeshConfig};

use crate::engine::{ConnectionEvent, RtcEngine};
use crate::machine::{MachineInput, NegotiationState, RemovalReason};
use crate::media::{LocalTrack, MediaCapture, MediaRequest};
use crate::signaling::{SignalingTransport, TransportEvent};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub rtc: RtcConfig,
    /// How long one offer/answer exchange may take before it counts as failed.
    pub negotiation_timeout: Duration,
    /// Fresh-connection attempts per peer after a failure.
    pub retry_limit: u32,
    pub media: MediaRequest,
    pub start_muted: bool,
}

impl SessionConfig {
    pub fn from_config(config: &VoxmeshConfig) -> Self {
        Self {
            rtc: config.rtc.clone(),
            negotiation_timeout: Duration::from_secs(config.negotiation.timeout_secs),
            retry_limit: config.negotiation.retry_limit,
            media: MediaRequest::from_config(&config.media),
            start_muted: config.media.start_muted,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&VoxmeshConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Events & Snapshots
// ---------------------------------------------------------------------------

/// Events surfaced to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RemoteStreamAvailable {
        peer_id: PeerId,
        stream: StreamHandle,
    },
    RemoteStateChanged {
        peer_id: PeerId,
        muted: bool,
        video_enabled: bool,
    },
    /// Emitted at most once per record, after its connection is closed.
    PeerRemoved {
        peer_id: PeerId,
        reason: RemovalReason,
    },
    /// The signaling transport dropped. Every peer is marked failed;
    /// rejoining is up to the application.
    ChannelDisconnected { channel_id: ChannelId },
}

/// Read-only view of one peer record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerSummary {
    pub peer_id: PeerId,
    pub state: NegotiationState,
    /// Negotiated and confirmed by the engine.
    pub connected: bool,
    pub pending_candidates: usize,
    pub local_muted: bool,
    pub remote_muted: bool,
    pub remote_video_enabled: bool,
    pub remote_stream: Option<StreamHandle>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub channel_id: ChannelId,
    pub local_peer: PeerId,
    pub roster: Vec<PeerId>,
    pub muted: bool,
    pub video_enabled: bool,
    /// Sorted by peer id.
    pub peers: Vec<PeerSummary>,
}

impl SessionSnapshot {
    pub fn peer(&self, peer: &PeerId) -> Option<&PeerSummary> {
        self.peers.iter().find(|p| &p.peer_id == peer)
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// Everything a session needs from its client.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub local: PeerId,
    pub config: SessionConfig,
    pub transport: Arc<dyn SignalingTransport>,
    pub engine: Arc<dyn RtcEngine>,
    pub capture: Arc<dyn MediaCapture>,
    pub events: mpsc::Sender<SessionEvent>,
}

/// Hand an event to the application without waiting. A receiver that has
/// fallen a full queue behind loses the event.
pub(crate) fn publish(events: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            warn!(?event, "session event queue full, dropping event");
        }
        Err(TrySendError::Closed(_)) => debug!("session event receiver dropped"),
    }
}

/// Commands on a session's queue. Everything that touches session state
/// goes through here, in order.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    Transport(TransportEvent),
    SetMuted {
        muted: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    SetVideo {
        enabled: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    ReplaceTrack {
        track: LocalTrack,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
    /// An engine operation for `peer` completed.
    OpFinished {
        peer: PeerId,
        op_id: u64,
        inputs: Vec<MachineInput>,
    },
    Engine {
        peer: PeerId,
        epoch: u64,
        event: ConnectionEvent,
    },
    Timeout {
        peer: PeerId,
        timer_id: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_from_file_config() {
        let mut config = VoxmeshConfig::default();
        config.negotiation.timeout_secs = 5;
        config.negotiation.retry_limit = 2;
        config.media.video = true;
        config.media.start_muted = true;

        let sc = SessionConfig::from_config(&config);
        assert_eq!(sc.negotiation_timeout, Duration::from_secs(5));
        assert_eq!(sc.retry_limit, 2);
        assert!(sc.media.video);
        assert!(sc.start_muted);
        assert_eq!(sc.rtc.ice_servers.len(), 3);
    }

    #[tokio::test]
    async fn publish_drops_events_when_queue_is_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let channel_id = ChannelId::from("voice-1");
        publish(&tx, SessionEvent::ChannelDisconnected { channel_id: channel_id.clone() });
        publish(&tx, SessionEvent::ChannelDisconnected { channel_id: "voice-2".into() });

        assert_eq!(rx.recv().await, Some(SessionEvent::ChannelDisconnected { channel_id }));
        assert!(rx.try_recv().is_err());

        drop(rx);
        publish(&tx, SessionEvent::ChannelDisconnected { channel_id: "voice-3".into() });
    }
}
