use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use voxmesh_common::{ChannelId, MediaError, PeerId, SignalingError, VoxError};

use super::*;
use crate::machine::{NegotiationState, RemovalReason};
use crate::media::{LocalTrack, TrackKind};
use crate::protocol::{IceCandidate, SignalMessage};
use crate::signaling::LoopbackHub;
use crate::testing::{FakeCapture, FakeEngine, CANDIDATES_PER_DESCRIPTION};

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct TestPeer {
    id: PeerId,
    client: VoiceClient,
    events: mpsc::Receiver<SessionEvent>,
    engine: FakeEngine,
    capture: FakeCapture,
}

impl TestPeer {
    async fn spawn(hub: &LoopbackHub, id: &str) -> Self {
        Self::spawn_with(hub, id, FakeEngine::new(), FakeCapture::new(), SessionConfig::default())
            .await
    }

    async fn spawn_with(
        hub: &LoopbackHub,
        id: &str,
        engine: FakeEngine,
        capture: FakeCapture,
        config: SessionConfig,
    ) -> Self {
        let id = PeerId::from(id);
        let (transport, transport_rx) = hub.connect(id.clone()).await;
        let (client, events) = VoiceClient::new(
            id.clone(),
            config,
            Arc::new(transport),
            transport_rx,
            Arc::new(engine.clone()),
            Arc::new(capture.clone()),
        );
        Self {
            id,
            client,
            events,
            engine,
            capture,
        }
    }

    async fn snapshot(&self) -> SessionSnapshot {
        self.client.snapshot().await.unwrap()
    }

    async fn wait_for(
        &self,
        what: &str,
        check: impl Fn(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let deadline = Instant::now() + WAIT;
        loop {
            let snapshot = self.snapshot().await;
            if check(&snapshot) {
                return snapshot;
            }
            assert!(
                Instant::now() < deadline,
                "{}: timed out waiting for {what}: {snapshot:?}",
                self.id
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_connected_to(&self, peers: &[&TestPeer]) -> SessionSnapshot {
        self.wait_for("connections", |s| {
            peers.iter().all(|p| {
                s.peer(&p.id)
                    .is_some_and(|r| r.connected && r.state == NegotiationState::Connected)
            })
        })
        .await
    }

    async fn next_event(
        &mut self,
        what: &str,
        wanted: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        let id = self.id.clone();
        let events = &mut self.events;
        tokio::time::timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Some(event) if wanted(&event) => return event,
                    Some(_) => continue,
                    None => panic!("event stream closed"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{id}: timed out waiting for {what}"))
    }

    fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn connected_pair(hub: &LoopbackHub) -> (TestPeer, TestPeer) {
    let a = TestPeer::spawn(hub, "alice").await;
    let b = TestPeer::spawn(hub, "bob").await;
    a.client.join_channel("voice-1").await.unwrap();
    b.client.join_channel("voice-1").await.unwrap();
    a.wait_connected_to(&[&b]).await;
    b.wait_connected_to(&[&a]).await;
    (a, b)
}

/// Push a signaling message straight into a client's current session.
async fn inject(client: &VoiceClient, message: SignalMessage) {
    let route = client.route.read().await.clone().expect("client is joined");
    route
        .send(SessionCommand::Transport(TransportEvent::Message(message)))
        .unwrap();
}

async fn recv_signal(
    rx: &mut mpsc::Receiver<TransportEvent>,
    wanted: impl Fn(&SignalMessage) -> bool,
) -> SignalMessage {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(TransportEvent::Message(message)) if wanted(&message) => return message,
                Some(_) => continue,
                None => panic!("transport closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for signaling message")
}

fn voice_1() -> ChannelId {
    ChannelId::from("voice-1")
}

/// A relay that accepts every frame and never answers.
#[derive(Clone, Default)]
struct MuteRelay {
    sent: Arc<StdMutex<Vec<SignalMessage>>>,
}

impl MuteRelay {
    fn kinds(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|m| m.kind()).collect()
    }
}

#[async_trait]
impl SignalingTransport for MuteRelay {
    async fn send(&self, message: SignalMessage) -> std::result::Result<(), SignalingError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Joining & leaving
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_peers_connect_and_leave() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = connected_pair(&hub).await;

    let event = a
        .next_event("remote stream", |e| {
            matches!(e, SessionEvent::RemoteStreamAvailable { .. })
        })
        .await;
    let SessionEvent::RemoteStreamAvailable { peer_id, stream } = event else {
        unreachable!()
    };
    assert_eq!(peer_id, b.id);
    let snapshot = a.snapshot().await;
    assert_eq!(snapshot.peer(&b.id).unwrap().remote_stream, Some(stream));
    assert_eq!(snapshot.roster, vec![b.id.clone()]);

    b.next_event("remote stream", |e| {
        matches!(e, SessionEvent::RemoteStreamAvailable { peer_id, .. } if peer_id.as_str() == "alice")
    })
    .await;
    assert_eq!(a.engine.connection_count(&b.id), 1);
    assert_eq!(b.engine.connection_count(&a.id), 1);

    a.client.leave_channel().await.unwrap();

    let removed = b
        .next_event("alice removed", |e| matches!(e, SessionEvent::PeerRemoved { .. }))
        .await;
    assert_eq!(
        removed,
        SessionEvent::PeerRemoved {
            peer_id: a.id.clone(),
            reason: RemovalReason::Left,
        }
    );
    b.wait_for("alice gone", |s| s.peers.is_empty() && s.roster.is_empty())
        .await;

    assert!(matches!(a.client.snapshot().await, Err(VoxError::NotJoined)));
    assert!(a.engine.latest(&b.id).unwrap().is_closed());
    assert!(b.engine.latest(&a.id).unwrap().is_closed());
    assert_eq!(a.capture.streams_stopped(), 1);
    assert_eq!(hub.members(&voice_1()).await, vec![b.id.clone()]);
}

#[tokio::test]
async fn newcomer_connects_once_to_every_member() {
    let hub = LoopbackHub::new();
    let mut members = Vec::new();
    for name in ["p1", "p2", "p3"] {
        let peer = TestPeer::spawn(&hub, name).await;
        peer.client.join_channel("room").await.unwrap();
        members.push(peer);
    }
    for peer in &members {
        let others: Vec<&TestPeer> = members.iter().filter(|o| o.id != peer.id).collect();
        peer.wait_connected_to(&others).await;
    }

    let newcomer = TestPeer::spawn(&hub, "p0").await;
    newcomer.client.join_channel("room").await.unwrap();
    members.push(newcomer);

    for peer in &members {
        let others: Vec<&TestPeer> = members.iter().filter(|o| o.id != peer.id).collect();
        let snapshot = peer.wait_connected_to(&others).await;
        assert_eq!(snapshot.peers.len(), 3);
    }

    for peer in &members {
        for other in members.iter().filter(|o| o.id != peer.id) {
            assert_eq!(peer.engine.connection_count(&other.id), 1);
            // The lower id of each pair offers, exactly once.
            let conn = peer.engine.latest(&other.id).unwrap();
            if peer.id < other.id {
                assert_eq!(conn.offers_created(), 1);
                assert_eq!(conn.remote_offers(), 0);
            } else {
                assert_eq!(conn.offers_created(), 0);
                assert_eq!(conn.remote_offers(), 1);
            }
            assert_eq!(conn.rollbacks(), 0);
        }
    }
}

#[tokio::test]
async fn joining_another_channel_leaves_the_first() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = connected_pair(&hub).await;

    a.client.join_channel("voice-2").await.unwrap();

    let removed = b
        .next_event("alice removed", |e| matches!(e, SessionEvent::PeerRemoved { .. }))
        .await;
    assert_eq!(
        removed,
        SessionEvent::PeerRemoved {
            peer_id: a.id.clone(),
            reason: RemovalReason::Left,
        }
    );
    let local = a
        .next_event("bob removed locally", |e| matches!(e, SessionEvent::PeerRemoved { .. }))
        .await;
    assert_eq!(
        local,
        SessionEvent::PeerRemoved {
            peer_id: b.id.clone(),
            reason: RemovalReason::LocalLeave,
        }
    );

    assert_eq!(a.client.current_channel().await, Some(ChannelId::from("voice-2")));
    assert_eq!(hub.members(&voice_1()).await, vec![b.id.clone()]);
    assert_eq!(hub.members(&ChannelId::from("voice-2")).await, vec![a.id.clone()]);
    assert!(a.snapshot().await.peers.is_empty());
}

#[tokio::test]
async fn rejoining_the_current_channel_is_a_no_op() {
    let hub = LoopbackHub::new();
    let (a, b) = connected_pair(&hub).await;

    a.client.join_channel("voice-1").await.unwrap();

    assert!(a.snapshot().await.peer(&b.id).unwrap().connected);
    assert_eq!(a.engine.connection_count(&b.id), 1);
    assert_eq!(a.capture.streams_stopped(), 0);
}

#[tokio::test]
async fn leaving_twice_removes_each_peer_once() {
    let hub = LoopbackHub::new();
    let (mut a, _b) = connected_pair(&hub).await;

    a.client.leave_channel().await.unwrap();
    a.client.leave_channel().await.unwrap();

    let removals: Vec<SessionEvent> = a
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::PeerRemoved { .. }))
        .collect();
    assert_eq!(
        removals,
        vec![SessionEvent::PeerRemoved {
            peer_id: PeerId::from("bob"),
            reason: RemovalReason::LocalLeave,
        }]
    );
    assert_eq!(a.capture.streams_stopped(), 1);
    assert!(a.client.current_channel().await.is_none());
}

#[tokio::test]
async fn media_failure_aborts_join_before_signaling() {
    let hub = LoopbackHub::new();
    let a = TestPeer::spawn_with(
        &hub,
        "alice",
        FakeEngine::new(),
        FakeCapture::denying(),
        SessionConfig::default(),
    )
    .await;

    let err = a.client.join_channel("voice-1").await.unwrap_err();

    assert!(matches!(err, VoxError::Media(MediaError::PermissionDenied(_))));
    assert!(hub.members(&voice_1()).await.is_empty());
    assert!(a.client.current_channel().await.is_none());
    assert_eq!(a.capture.tracks_acquired(), 0);
}

#[tokio::test]
async fn full_channel_refuses_join_and_releases_media() {
    let hub = LoopbackHub::with_max_peers(1);
    let a = TestPeer::spawn(&hub, "alice").await;
    let mut b = TestPeer::spawn(&hub, "bob").await;
    a.client.join_channel("voice-1").await.unwrap();

    let err = b.client.join_channel("voice-1").await.unwrap_err();

    assert!(
        matches!(err, VoxError::Signaling(SignalingError::Refused(_))),
        "{err:?}"
    );
    assert!(b.client.current_channel().await.is_none());
    assert!(matches!(b.client.snapshot().await, Err(VoxError::NotJoined)));
    assert_eq!(b.capture.streams_stopped(), 1);
    assert!(b.drain_events().is_empty());
    assert_eq!(hub.members(&voice_1()).await, vec![a.id.clone()]);
    assert!(a.snapshot().await.peers.is_empty());
}

#[tokio::test]
async fn unanswered_join_times_out_and_releases_media() {
    let relay = MuteRelay::default();
    let capture = FakeCapture::new();
    let (_transport_tx, transport_rx) = mpsc::channel(8);
    let config = SessionConfig {
        negotiation_timeout: Duration::from_millis(100),
        ..SessionConfig::default()
    };
    let (client, _events) = VoiceClient::new(
        PeerId::from("alice"),
        config,
        Arc::new(relay.clone()),
        transport_rx,
        Arc::new(FakeEngine::new()),
        Arc::new(capture.clone()),
    );

    let err = client.join_channel("voice-1").await.unwrap_err();

    assert!(
        matches!(err, VoxError::Signaling(SignalingError::Timeout)),
        "{err:?}"
    );
    assert!(client.current_channel().await.is_none());
    assert_eq!(capture.streams_stopped(), 1);
    // The relay may have accepted the join late, so it is told we left.
    assert_eq!(relay.kinds(), vec!["join", "leave"]);
}

#[tokio::test]
async fn operations_without_a_channel_report_not_joined() {
    let hub = LoopbackHub::new();
    let a = TestPeer::spawn(&hub, "alice").await;

    assert!(matches!(a.client.set_muted(true).await, Err(VoxError::NotJoined)));
    assert!(matches!(
        a.client.set_video_enabled(true).await,
        Err(VoxError::NotJoined)
    ));
    assert!(matches!(
        a.client.replace_track(LocalTrack::new(TrackKind::Audio)).await,
        Err(VoxError::NotJoined)
    ));
    assert!(matches!(a.client.snapshot().await, Err(VoxError::NotJoined)));
    a.client.leave_channel().await.unwrap();
    assert_eq!(a.client.local_peer(), &a.id);
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn candidates_arrive_complete_and_in_order() {
    let hub = LoopbackHub::new();
    let (a, b) = connected_pair(&hub).await;

    let a_conn = a.engine.latest(&b.id).unwrap();
    let b_conn = b.engine.latest(&a.id).unwrap();
    eventually("alice applies bob's candidates", || {
        a_conn.applied_candidates() == b_conn.emitted_candidates()
    })
    .await;
    eventually("bob applies alice's candidates", || {
        b_conn.applied_candidates() == a_conn.emitted_candidates()
    })
    .await;
    assert_eq!(a_conn.applied_candidates().len(), CANDIDATES_PER_DESCRIPTION);
}

#[tokio::test]
async fn candidates_before_the_offer_are_buffered() {
    let hub = LoopbackHub::new();
    let alice = PeerId::from("alice");
    let (raw, mut raw_rx) = hub.connect(alice.clone()).await;
    raw.send(SignalMessage::Join {
        channel_id: voice_1(),
        peer_id: alice.clone(),
    })
    .await
    .unwrap();

    let b = TestPeer::spawn(&hub, "bob").await;
    b.client.join_channel("voice-1").await.unwrap();
    b.wait_for("alice record", |s| s.peer(&alice).is_some()).await;

    let candidates: Vec<IceCandidate> = (0..3)
        .map(|i| IceCandidate::new(format!("candidate:early {i}")))
        .collect();
    for candidate in &candidates {
        raw.send(SignalMessage::IceCandidate {
            channel_id: voice_1(),
            to: b.id.clone(),
            from: alice.clone(),
            candidate: candidate.clone(),
        })
        .await
        .unwrap();
    }
    b.wait_for("buffered candidates", |s| {
        s.peer(&alice).is_some_and(|p| p.pending_candidates == 3)
    })
    .await;
    let conn = b.engine.latest(&alice).unwrap();
    assert!(conn.applied_candidates().is_empty());

    raw.send(SignalMessage::Offer {
        channel_id: voice_1(),
        to: b.id.clone(),
        from: alice.clone(),
        sdp: "raw-offer".into(),
    })
    .await
    .unwrap();

    let answer = recv_signal(&mut raw_rx, |m| matches!(m, SignalMessage::Answer { .. })).await;
    assert_eq!(answer.sender(), Some(&b.id));
    eventually("buffered candidates applied", || {
        conn.applied_candidates() == candidates
    })
    .await;
    b.wait_for("buffer drained", |s| {
        s.peer(&alice).is_some_and(|p| p.pending_candidates == 0)
    })
    .await;
}

#[tokio::test]
async fn simultaneous_renegotiation_resolves_by_peer_id() {
    let hub = LoopbackHub::new();
    let delay = Duration::from_millis(50);
    let a = TestPeer::spawn_with(
        &hub,
        "alice",
        FakeEngine::new().with_offer_delay(delay),
        FakeCapture::new(),
        SessionConfig::default(),
    )
    .await;
    let b = TestPeer::spawn_with(
        &hub,
        "bob",
        FakeEngine::new().with_offer_delay(delay),
        FakeCapture::new(),
        SessionConfig::default(),
    )
    .await;
    a.client.join_channel("voice-1").await.unwrap();
    b.client.join_channel("voice-1").await.unwrap();
    a.wait_connected_to(&[&b]).await;
    b.wait_connected_to(&[&a]).await;

    // Both add video at once, so both offer at once.
    let (ra, rb) = tokio::join!(
        a.client.set_video_enabled(true),
        b.client.set_video_enabled(true)
    );
    ra.unwrap();
    rb.unwrap();

    let a_conn = a.engine.latest(&b.id).unwrap();
    let b_conn = b.engine.latest(&a.id).unwrap();
    eventually("bob's follow-up offer", || a_conn.remote_offers() == 1).await;
    a.wait_for("bob video", |s| {
        s.peer(&b.id)
            .is_some_and(|p| p.connected && p.remote_video_enabled)
    })
    .await;
    b.wait_for("alice video", |s| {
        s.peer(&a.id)
            .is_some_and(|p| p.connected && p.remote_video_enabled)
    })
    .await;

    // The greater id rolled back once and answered; the lesser never did.
    assert_eq!(b_conn.rollbacks(), 1);
    assert_eq!(a_conn.rollbacks(), 0);
    assert_eq!(b_conn.remote_offers(), 2);
    assert_eq!(a_conn.offers_created(), 2);
    assert_eq!(b_conn.offers_created(), 2);
    assert_eq!(a.engine.connection_count(&b.id), 1);
    assert_eq!(b.engine.connection_count(&a.id), 1);
    assert_eq!(a_conn.tracks().len(), 2);
    assert_eq!(b_conn.tracks().len(), 2);
}

#[tokio::test]
async fn failed_offer_is_retried_on_a_fresh_connection() {
    let hub = LoopbackHub::new();
    let engine = FakeEngine::new();
    engine.fail_next_offers(1);
    let a = TestPeer::spawn_with(&hub, "alice", engine, FakeCapture::new(), SessionConfig::default())
        .await;
    let b = TestPeer::spawn(&hub, "bob").await;
    a.client.join_channel("voice-1").await.unwrap();
    b.client.join_channel("voice-1").await.unwrap();

    a.wait_connected_to(&[&b]).await;
    b.wait_connected_to(&[&a]).await;

    let attempts = a.engine.connections_to(&b.id);
    assert_eq!(attempts.len(), 2);
    assert!(attempts[0].is_closed());
    assert!(!attempts[1].is_closed());
    assert_eq!(b.engine.connection_count(&a.id), 1);
}

#[tokio::test]
async fn unresponsive_peer_is_removed_as_unreachable() {
    let hub = LoopbackHub::new();
    let config = SessionConfig {
        negotiation_timeout: Duration::from_millis(150),
        ..SessionConfig::default()
    };
    let mut a = TestPeer::spawn_with(
        &hub,
        "alice",
        FakeEngine::silent(),
        FakeCapture::new(),
        config.clone(),
    )
    .await;
    let b = TestPeer::spawn_with(&hub, "bob", FakeEngine::new(), FakeCapture::new(), config)
        .await;
    a.client.join_channel("voice-1").await.unwrap();
    b.client.join_channel("voice-1").await.unwrap();

    let removed = a
        .next_event("bob unreachable", |e| matches!(e, SessionEvent::PeerRemoved { .. }))
        .await;
    assert_eq!(
        removed,
        SessionEvent::PeerRemoved {
            peer_id: b.id.clone(),
            reason: RemovalReason::Unreachable,
        }
    );

    // One attempt plus one retry, both closed.
    let attempts = a.engine.connections_to(&b.id);
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|c| c.is_closed()));
    let snapshot = a.snapshot().await;
    assert!(snapshot.peer(&b.id).is_none());
    assert_eq!(snapshot.roster, vec![b.id.clone()]);
}

#[tokio::test]
async fn connectivity_loss_reconnects_on_a_fresh_connection() {
    let hub = LoopbackHub::new();
    let (a, b) = connected_pair(&hub).await;

    a.engine.latest(&b.id).unwrap().drop_connectivity();

    eventually("second connection", || a.engine.connection_count(&b.id) == 2).await;
    a.wait_connected_to(&[&b]).await;
    b.wait_connected_to(&[&a]).await;
    assert!(a.engine.connections_to(&b.id)[0].is_closed());
    // Bob treats the retry as a renegotiation of his existing connection.
    assert_eq!(b.engine.connection_count(&a.id), 1);
    assert_eq!(b.engine.latest(&a.id).unwrap().remote_offers(), 2);
}

// ---------------------------------------------------------------------------
// Media state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mute_applies_locally_then_reaches_peers() {
    let hub = LoopbackHub::new();
    let (a, mut b) = connected_pair(&hub).await;

    a.client.set_muted(true).await.unwrap();

    let conn = a.engine.latest(&b.id).unwrap();
    let audio = conn
        .tracks()
        .into_iter()
        .find(|t| t.kind() == TrackKind::Audio)
        .unwrap();
    assert!(!audio.is_enabled());
    let snapshot = a.snapshot().await;
    assert!(snapshot.muted);
    assert!(snapshot.peer(&b.id).unwrap().local_muted);

    let event = b
        .next_event("alice muted", |e| matches!(e, SessionEvent::RemoteStateChanged { .. }))
        .await;
    assert_eq!(
        event,
        SessionEvent::RemoteStateChanged {
            peer_id: a.id.clone(),
            muted: true,
            video_enabled: false,
        }
    );
    assert!(b.snapshot().await.peer(&a.id).unwrap().remote_muted);
    // Muting does not renegotiate.
    assert_eq!(conn.offers_created(), 1);
}

#[tokio::test]
async fn start_muted_is_announced_to_new_peers() {
    let hub = LoopbackHub::new();
    let config = SessionConfig {
        start_muted: true,
        ..SessionConfig::default()
    };
    let a = TestPeer::spawn_with(&hub, "alice", FakeEngine::new(), FakeCapture::new(), config)
        .await;
    let mut b = TestPeer::spawn(&hub, "bob").await;
    a.client.join_channel("voice-1").await.unwrap();
    b.client.join_channel("voice-1").await.unwrap();

    let event = b
        .next_event("alice state", |e| matches!(e, SessionEvent::RemoteStateChanged { .. }))
        .await;
    assert_eq!(
        event,
        SessionEvent::RemoteStateChanged {
            peer_id: a.id.clone(),
            muted: true,
            video_enabled: false,
        }
    );
    assert!(a.snapshot().await.muted);
}

#[tokio::test]
async fn replaced_track_reaches_connections_without_renegotiation() {
    let hub = LoopbackHub::new();
    let (a, b) = connected_pair(&hub).await;

    a.client
        .replace_track(LocalTrack::with_id("mic-2", TrackKind::Audio))
        .await
        .unwrap();

    let conn = a.engine.latest(&b.id).unwrap();
    eventually("new track attached", || {
        conn.tracks().iter().any(|t| t.id() == "mic-2")
    })
    .await;
    assert_eq!(conn.tracks().len(), 1);
    assert_eq!(conn.offers_created(), 1);

    let err = a
        .client
        .replace_track(LocalTrack::new(TrackKind::Video))
        .await
        .unwrap_err();
    assert!(matches!(err, VoxError::Media(MediaError::Capture(_))));
}

// ---------------------------------------------------------------------------
// Message filtering & transport loss
// ---------------------------------------------------------------------------

#[tokio::test]
async fn answer_from_unknown_peer_is_ignored() {
    let hub = LoopbackHub::new();
    let (a, _b) = connected_pair(&hub).await;
    let ghost = PeerId::from("ghost");

    inject(
        &a.client,
        SignalMessage::Answer {
            channel_id: voice_1(),
            to: a.id.clone(),
            from: ghost.clone(),
            sdp: "stray-answer".into(),
        },
    )
    .await;
    inject(
        &a.client,
        SignalMessage::Offer {
            channel_id: ChannelId::from("elsewhere"),
            to: a.id.clone(),
            from: ghost.clone(),
            sdp: "wrong-channel".into(),
        },
    )
    .await;

    let snapshot = a.snapshot().await;
    assert!(snapshot.peer(&ghost).is_none());
    assert_eq!(snapshot.peers.len(), 1);
    assert_eq!(a.engine.connection_count(&ghost), 0);
}

#[tokio::test]
async fn offer_from_unlisted_peer_creates_a_record() {
    let hub = LoopbackHub::new();
    let (a, _b) = connected_pair(&hub).await;
    let ghost = PeerId::from("ghost");

    inject(
        &a.client,
        SignalMessage::Offer {
            channel_id: voice_1(),
            to: a.id.clone(),
            from: ghost.clone(),
            sdp: "early-offer".into(),
        },
    )
    .await;

    a.wait_for("ghost record", |s| s.peer(&ghost).is_some()).await;
    eventually("ghost connection", || a.engine.connection_count(&ghost) == 1).await;
    eventually("offer applied", || {
        a.engine
            .latest(&ghost)
            .is_some_and(|c| c.remote_offers() == 1)
    })
    .await;
}

#[tokio::test]
async fn late_messages_from_departed_peer_are_ignored() {
    let hub = LoopbackHub::new();
    let (a, mut b) = connected_pair(&hub).await;

    a.client.leave_channel().await.unwrap();
    b.next_event("alice removed", |e| matches!(e, SessionEvent::PeerRemoved { .. }))
        .await;

    inject(
        &b.client,
        SignalMessage::IceCandidate {
            channel_id: voice_1(),
            to: b.id.clone(),
            from: a.id.clone(),
            candidate: IceCandidate::new("candidate:late"),
        },
    )
    .await;
    inject(
        &b.client,
        SignalMessage::MediaState {
            channel_id: voice_1(),
            from: a.id.clone(),
            to: None,
            muted: true,
            video_enabled: false,
        },
    )
    .await;

    let snapshot = b.snapshot().await;
    assert!(snapshot.peers.is_empty());
    assert_eq!(b.engine.connection_count(&a.id), 1);
    assert!(b
        .drain_events()
        .iter()
        .all(|e| !matches!(e, SessionEvent::RemoteStateChanged { .. })));
}

#[tokio::test]
async fn transport_loss_fails_every_peer() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = connected_pair(&hub).await;

    hub.disconnect(&a.id).await;

    let event = a
        .next_event("disconnect", |e| matches!(e, SessionEvent::ChannelDisconnected { .. }))
        .await;
    assert_eq!(
        event,
        SessionEvent::ChannelDisconnected {
            channel_id: voice_1(),
        }
    );
    a.wait_for("bob failed", |s| {
        s.peer(&b.id)
            .is_some_and(|p| p.state == NegotiationState::Failed)
    })
    .await;

    let removed = b
        .next_event("alice removed", |e| matches!(e, SessionEvent::PeerRemoved { .. }))
        .await;
    assert_eq!(
        removed,
        SessionEvent::PeerRemoved {
            peer_id: a.id.clone(),
            reason: RemovalReason::Left,
        }
    );

    // Leaving afterwards still closes the failed connection.
    a.client.leave_channel().await.unwrap();
    assert!(a.engine.latest(&b.id).unwrap().is_closed());
}

#[tokio::test]
async fn same_channel_can_be_rejoined_after_transport_loss() {
    let hub = LoopbackHub::new();
    let (mut a, mut b) = connected_pair(&hub).await;
    let stale = a.engine.latest(&b.id).unwrap();

    hub.disconnect(&a.id).await;
    a.next_event("disconnect", |e| matches!(e, SessionEvent::ChannelDisconnected { .. }))
        .await;
    b.next_event("alice removed", |e| matches!(e, SessionEvent::PeerRemoved { .. }))
        .await;

    // Link still down: the stale session is left and the attempt fails.
    let err = a.client.join_channel("voice-1").await.unwrap_err();
    assert!(
        matches!(err, VoxError::Signaling(SignalingError::NotConnected)),
        "{err:?}"
    );
    assert!(stale.is_closed());
    assert!(a.client.current_channel().await.is_none());

    assert!(hub.reconnect(&a.id).await);
    a.client.join_channel("voice-1").await.unwrap();

    a.wait_connected_to(&[&b]).await;
    b.wait_connected_to(&[&a]).await;
    assert_eq!(hub.members(&voice_1()).await, vec![b.id.clone(), a.id.clone()]);
    assert_eq!(a.engine.connection_count(&b.id), 2);
    assert_eq!(b.engine.connection_count(&a.id), 2);
}

#[tokio::test]
async fn undrained_events_do_not_stall_the_session() {
    let hub = LoopbackHub::new();
    let (a, b) = connected_pair(&hub).await;

    for i in 0..EVENT_QUEUE_CAPACITY + 20 {
        inject(
            &a.client,
            SignalMessage::MediaState {
                channel_id: voice_1(),
                from: b.id.clone(),
                to: None,
                muted: i % 2 == 0,
                video_enabled: false,
            },
        )
        .await;
    }

    let snapshot = tokio::time::timeout(WAIT, a.client.snapshot())
        .await
        .expect("session stalled")
        .unwrap();
    assert!(snapshot.peer(&b.id).is_some());
    tokio::time::timeout(WAIT, a.client.leave_channel())
        .await
        .expect("leave stalled")
        .unwrap();
    assert!(a.engine.latest(&b.id).unwrap().is_closed());
}
