//! In-memory engine and capture doubles for unit and session tests.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use voxmesh_common::{EngineError, MediaError, PeerId, StreamHandle};
use voxmesh_config::RtcConfig;

use crate::engine::{
    ConnectionEvent, Connectivity, EngineEventSink, PeerConnection, RtcEngine, SdpKind,
    SessionDescription,
};
use crate::media::{LocalStream, LocalTrack, MediaCapture, MediaRequest, TrackKind};
use crate::protocol::IceCandidate;

/// Candidates gathered per local description.
pub(crate) const CANDIDATES_PER_DESCRIPTION: usize = 3;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CaptureState {
    deny: bool,
    tracks_acquired: AtomicUsize,
    streams_stopped: AtomicUsize,
}

/// Capture double. Clones share counters.
#[derive(Clone, Default)]
pub(crate) struct FakeCapture {
    inner: Arc<CaptureState>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every acquisition fails with `PermissionDenied`.
    pub fn denying() -> Self {
        Self {
            inner: Arc::new(CaptureState {
                deny: true,
                ..Default::default()
            }),
        }
    }

    pub fn tracks_acquired(&self) -> usize {
        self.inner.tracks_acquired.load(Ordering::SeqCst)
    }

    pub fn streams_stopped(&self) -> usize {
        self.inner.streams_stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn acquire_local_stream(&self, request: MediaRequest) -> Result<LocalStream, MediaError> {
        let mut tracks = Vec::new();
        if request.audio {
            tracks.push(self.acquire_track(TrackKind::Audio).await?);
        }
        if request.video {
            tracks.push(self.acquire_track(TrackKind::Video).await?);
        }
        Ok(LocalStream::new(tracks))
    }

    async fn acquire_track(&self, kind: TrackKind) -> Result<LocalTrack, MediaError> {
        if self.inner.deny {
            return Err(MediaError::PermissionDenied(kind.to_string()));
        }
        self.inner.tracks_acquired.fetch_add(1, Ordering::SeqCst);
        Ok(LocalTrack::new(kind))
    }

    async fn stop_stream(&self, _stream: &LocalStream) {
        self.inner.streams_stopped.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct EngineState {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    failing_offers: AtomicU32,
    silent: AtomicBool,
    offer_delay_ms: AtomicU64,
}

/// Engine double. A connection reports itself connected, with one remote
/// stream, as soon as it holds a local and a remote description of
/// opposite kinds.
#[derive(Clone, Default)]
pub(crate) struct FakeEngine {
    inner: Arc<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections negotiate but never report connectivity.
    pub fn silent() -> Self {
        let engine = Self::default();
        engine.inner.silent.store(true, Ordering::SeqCst);
        engine
    }

    /// Every `create_offer` waits this long first.
    pub fn with_offer_delay(self, delay: Duration) -> Self {
        self.inner
            .offer_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub fn fail_next_offers(&self, count: u32) {
        self.inner.failing_offers.store(count, Ordering::SeqCst);
    }

    pub fn connections_to(&self, peer: &PeerId) -> Vec<Arc<FakeConnection>> {
        lock(&self.inner.connections)
            .iter()
            .filter(|c| &c.peer == peer)
            .cloned()
            .collect()
    }

    pub fn latest(&self, peer: &PeerId) -> Option<Arc<FakeConnection>> {
        self.connections_to(peer).pop()
    }

    pub fn connection_count(&self, peer: &PeerId) -> usize {
        self.connections_to(peer).len()
    }
}

#[async_trait]
impl RtcEngine for FakeEngine {
    async fn create_connection(
        &self,
        peer: &PeerId,
        _config: &RtcConfig,
        events: EngineEventSink,
    ) -> Result<Arc<dyn PeerConnection>, EngineError> {
        let conn = Arc::new(FakeConnection {
            id: NEXT_CONNECTION.fetch_add(1, Ordering::SeqCst),
            peer: peer.clone(),
            sink: events,
            engine: Arc::clone(&self.inner),
            state: Mutex::new(ConnState::default()),
        });
        lock(&self.inner.connections).push(Arc::clone(&conn));
        Ok(conn)
    }
}

#[derive(Default)]
struct ConnState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    negotiated: bool,
    connected: bool,
    closed: bool,
    tracks: Vec<LocalTrack>,
    emitted: Vec<IceCandidate>,
    applied: Vec<IceCandidate>,
    remote_offers: Vec<String>,
    offers_created: u32,
    rollbacks: u32,
}

pub(crate) struct FakeConnection {
    id: u64,
    peer: PeerId,
    sink: EngineEventSink,
    engine: Arc<EngineState>,
    state: Mutex<ConnState>,
}

impl FakeConnection {
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn tracks(&self) -> Vec<LocalTrack> {
        lock(&self.state).tracks.clone()
    }

    pub fn emitted_candidates(&self) -> Vec<IceCandidate> {
        lock(&self.state).emitted.clone()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        lock(&self.state).applied.clone()
    }

    pub fn remote_offers(&self) -> usize {
        lock(&self.state).remote_offers.len()
    }

    pub fn offers_created(&self) -> u32 {
        lock(&self.state).offers_created
    }

    pub fn rollbacks(&self) -> u32 {
        lock(&self.state).rollbacks
    }

    /// Report a transport failure as the engine would.
    pub fn drop_connectivity(&self) {
        self.sink
            .emit(ConnectionEvent::Connectivity(Connectivity::Failed));
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if lock(&self.state).closed {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    fn maybe_connect(&self) {
        let first = {
            let mut st = lock(&self.state);
            let complete = match (&st.local, &st.remote) {
                (Some(local), Some(remote)) => local.kind != remote.kind,
                _ => false,
            };
            if !complete {
                return;
            }
            st.negotiated = true;
            !std::mem::replace(&mut st.connected, true)
        };
        if first && !self.engine.silent.load(Ordering::SeqCst) {
            self.sink
                .emit(ConnectionEvent::Connectivity(Connectivity::Connected));
            self.sink.emit(ConnectionEvent::RemoteStream(StreamHandle::new(
                format!("stream-{}-{}", self.peer, self.id),
            )));
        }
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let delay = self.engine.offer_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.ensure_open()?;
        let failing = &self.engine.failing_offers;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::Negotiation("injected offer failure".into()));
        }

        let mut st = lock(&self.state);
        st.offers_created += 1;
        Ok(SessionDescription::offer(format!(
            "fake-offer conn={} n={} tracks={}",
            self.id,
            st.offers_created,
            st.tracks.len()
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        self.ensure_open()?;
        let st = lock(&self.state);
        match &st.remote {
            Some(remote) if remote.kind == SdpKind::Offer => Ok(SessionDescription::answer(
                format!("fake-answer conn={} to={}", self.id, remote.sdp),
            )),
            _ => Err(EngineError::Negotiation("no remote offer to answer".into())),
        }
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.ensure_open()?;
        let gathered: Vec<IceCandidate> = {
            let mut st = lock(&self.state);
            st.local = Some(desc);
            let base = st.emitted.len();
            let batch: Vec<IceCandidate> = (0..CANDIDATES_PER_DESCRIPTION)
                .map(|i| {
                    let mut c = IceCandidate::new(format!(
                        "candidate:{} 1 udp {} 10.0.0.{} 5000 typ host",
                        self.id,
                        base + i,
                        i + 1
                    ));
                    c.sdp_mid = Some("0".into());
                    c.sdp_mline_index = Some(0);
                    c
                })
                .collect();
            st.emitted.extend(batch.iter().cloned());
            batch
        };
        for candidate in gathered {
            self.sink.emit(ConnectionEvent::LocalCandidate(candidate));
        }
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.ensure_open()?;
        {
            let mut st = lock(&self.state);
            if desc.kind == SdpKind::Offer {
                st.remote_offers.push(desc.sdp.clone());
            }
            st.remote = Some(desc);
        }
        self.maybe_connect();
        Ok(())
    }

    async fn rollback_local_description(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        let mut st = lock(&self.state);
        st.local = None;
        st.rollbacks += 1;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.ensure_open()?;
        let mut st = lock(&self.state);
        if st.remote.is_none() {
            return Err(EngineError::Candidate("remote description not set".into()));
        }
        st.applied.push(candidate);
        Ok(())
    }

    async fn attach_track(&self, track: &LocalTrack) -> Result<bool, EngineError> {
        self.ensure_open()?;
        let mut st = lock(&self.state);
        if let Some(existing) = st.tracks.iter_mut().find(|t| t.kind() == track.kind()) {
            *existing = track.clone();
            return Ok(false);
        }
        st.tracks.push(track.clone());
        Ok(st.negotiated)
    }

    async fn close(&self) -> Result<(), EngineError> {
        {
            let mut st = lock(&self.state);
            if st.closed {
                return Ok(());
            }
            st.closed = true;
        }
        self.sink
            .emit(ConnectionEvent::Connectivity(Connectivity::Closed));
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
