//! [`RtcEngine`] on webrtc-rs.
//!
//! Local tracks are [`TrackLocalStaticSample`]s shared by every connection:
//! the application writes samples once through [`WebRtcEngine::local_track`]
//! and each peer connection sends them. Remote tracks are handed to the
//! application on the receiver returned by [`WebRtcEngine::new`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, warn};
use voxmesh_common::{new_short_id, EngineError, PeerId, StreamHandle};
use voxmesh_config::{IceServerConfig, RtcConfig};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::{
    ConnectionEvent, Connectivity, EngineEventSink, PeerConnection, RtcEngine, SdpKind,
    SessionDescription,
};
use crate::media::{LocalTrack, TrackKind};
use crate::protocol::IceCandidate;

/// An incoming media track.
pub struct RemoteTrack {
    pub peer: PeerId,
    pub stream: StreamHandle,
    pub track: Arc<TrackRemote>,
}

type TrackRegistry = Arc<Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>>;

pub struct WebRtcEngine {
    api: Arc<API>,
    stream_id: String,
    tracks: TrackRegistry,
    remote_tx: mpsc::UnboundedSender<RemoteTrack>,
}

impl WebRtcEngine {
    /// Build the engine with the default codecs and interceptors.
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<RemoteTrack>), EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| EngineError::Connection(format!("failed to register codecs: {e}")))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| EngineError::Connection(format!("failed to register interceptors: {e}")))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let engine = Self {
            api: Arc::new(api),
            stream_id: format!("voxmesh-{}", new_short_id()),
            tracks: Arc::new(Mutex::new(HashMap::new())),
            remote_tx,
        };
        Ok((engine, remote_rx))
    }

    /// The sample track backing `track`, created on first use. Capture
    /// pipelines write here while `track.is_enabled()` holds.
    pub fn local_track(&self, track: &LocalTrack) -> Arc<TrackLocalStaticSample> {
        sample_track(&self.tracks, &self.stream_id, track)
    }
}

#[async_trait]
impl RtcEngine for WebRtcEngine {
    async fn create_connection(
        &self,
        peer: &PeerId,
        config: &RtcConfig,
        events: EngineEventSink,
    ) -> Result<Arc<dyn PeerConnection>, EngineError> {
        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers.iter().map(ice_server).collect(),
            ..Default::default()
        };
        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config)
                .await
                .map_err(|e| EngineError::Connection(e.to_string()))?,
        );

        let sink = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        sink.emit(ConnectionEvent::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }));
                    }
                    Err(e) => warn!(peer = %sink.peer(), error = %e, "failed to encode local candidate"),
                }
            })
        }));

        let sink = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let connectivity = match state {
                RTCPeerConnectionState::Connected => Some(Connectivity::Connected),
                RTCPeerConnectionState::Disconnected => Some(Connectivity::Disconnected),
                RTCPeerConnectionState::Failed => Some(Connectivity::Failed),
                RTCPeerConnectionState::Closed => Some(Connectivity::Closed),
                _ => None,
            };
            debug!(peer = %sink.peer(), %state, "peer connection state");
            if let Some(connectivity) = connectivity {
                sink.emit(ConnectionEvent::Connectivity(connectivity));
            }
            Box::pin(async {})
        }));

        let sink = events;
        let remote_tx = self.remote_tx.clone();
        let seen_streams: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let stream = StreamHandle::new(track.stream_id());
            if lock(&seen_streams).insert(stream.as_str().to_string()) {
                sink.emit(ConnectionEvent::RemoteStream(stream.clone()));
            }
            let _ = remote_tx.send(RemoteTrack {
                peer: sink.peer().clone(),
                stream,
                track,
            });
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcConnection {
            pc,
            stream_id: self.stream_id.clone(),
            tracks: Arc::clone(&self.tracks),
            senders: AsyncMutex::new(HashMap::new()),
        }))
    }
}

struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    stream_id: String,
    tracks: TrackRegistry,
    senders: AsyncMutex<HashMap<TrackKind, Arc<RTCRtpSender>>>,
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| EngineError::Negotiation(format!("create offer: {e}")))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| EngineError::Negotiation(format!("create answer: {e}")))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| EngineError::Negotiation(format!("set local description: {e}")))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| EngineError::Negotiation(format!("set remote description: {e}")))
    }

    async fn rollback_local_description(&self) -> Result<(), EngineError> {
        let mut rollback = RTCSessionDescription::default();
        rollback.sdp_type = RTCSdpType::Rollback;
        self.pc
            .set_local_description(rollback)
            .await
            .map_err(|e| EngineError::Negotiation(format!("rollback: {e}")))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| EngineError::Candidate(e.to_string()))
    }

    async fn attach_track(&self, track: &LocalTrack) -> Result<bool, EngineError> {
        let local = sample_track(&self.tracks, &self.stream_id, track);
        let mut senders = self.senders.lock().await;

        if let Some(sender) = senders.get(&track.kind()) {
            sender
                .replace_track(Some(local as Arc<dyn TrackLocal + Send + Sync>))
                .await
                .map_err(|e| EngineError::Track(format!("replace {}: {e}", track.kind())))?;
            return Ok(false);
        }

        let sender = self
            .pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| EngineError::Track(format!("add {}: {e}", track.kind())))?;

        // RTCP has to be read for interceptors to work.
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });
        senders.insert(track.kind(), sender);

        Ok(self.pc.remote_description().await.is_some())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc
            .close()
            .await
            .map_err(|e| EngineError::Connection(format!("close: {e}")))
    }
}

fn sample_track(
    tracks: &TrackRegistry,
    stream_id: &str,
    track: &LocalTrack,
) -> Arc<TrackLocalStaticSample> {
    let mut tracks = lock(tracks);
    let entry = tracks.entry(track.id().to_string()).or_insert_with(|| {
        let capability = match track.kind() {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
        };
        Arc::new(TrackLocalStaticSample::new(
            capability,
            track.id().to_string(),
            stream_id.to_string(),
        ))
    });
    Arc::clone(entry)
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let result = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    result.map_err(|e| EngineError::Negotiation(format!("invalid sdp: {e}")))
}

fn ice_server(server: &IceServerConfig) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
