//! Full-mesh voice channel client.
//!
//! Every participant of a channel holds one WebRTC peer connection to every
//! other participant. A relay only forwards signaling; media flows
//! peer-to-peer. [`VoiceClient`] is the entry point: it joins a channel over
//! a [`SignalingTransport`], negotiates a connection per remote peer through
//! an [`RtcEngine`], and reports [`SessionEvent`]s.

pub mod client;
pub mod engine;
pub mod machine;
pub mod media;
pub mod membership;
pub mod protocol;
pub mod session;
pub mod signaling;

mod orchestrator;

#[cfg(test)]
pub(crate) mod testing;

pub use client::VoiceClient;
pub use engine::{
    ConnectionEvent, Connectivity, EngineEventSink, PeerConnection, RtcEngine, SdpKind,
    SessionDescription,
};
pub use machine::{ConnectionMachine, NegotiationState, RemovalReason};
pub use media::{LocalStream, LocalTrack, MediaCapture, MediaRequest, TrackKind};
pub use membership::{MembershipDelta, MembershipTracker};
pub use protocol::{IceCandidate, SignalMessage};
pub use session::{PeerSummary, SessionConfig, SessionEvent, SessionSnapshot};
pub use signaling::{
    LoopbackHub, LoopbackTransport, RoomRouter, SignalingTransport, TransportEvent,
    WsSignalingClient,
};

#[cfg(feature = "webrtc-engine")]
pub use engine::{RemoteTrack, WebRtcEngine};
