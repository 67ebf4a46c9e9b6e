//! Application-facing voice client.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;
use voxmesh_common::{ChannelId, PeerId, Result, VoxError};

use crate::engine::RtcEngine;
use crate::media::{LocalTrack, MediaCapture};
use crate::session::{
    ChannelSession, SessionCommand, SessionConfig, SessionContext, SessionEvent, SessionSnapshot,
};
use crate::signaling::{SignalingTransport, TransportEvent};

const EVENT_QUEUE_CAPACITY: usize = 256;

type Route = Arc<RwLock<Option<mpsc::UnboundedSender<SessionCommand>>>>;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Joins one voice channel at a time over a shared signaling transport.
///
/// Transport events are forwarded to whichever channel session is current.
/// Joining a new channel leaves the previous one first.
pub struct VoiceClient {
    ctx: SessionContext,
    current: Mutex<Option<ChannelSession>>,
    route: Route,
    router: JoinHandle<()>,
}

impl VoiceClient {
    /// Build a client around an already connected transport. Returns a
    /// receiver for session events; if it falls 256 events behind, further
    /// events are dropped with a warning rather than stalling the session.
    pub fn new(
        local: PeerId,
        config: SessionConfig,
        transport: Arc<dyn SignalingTransport>,
        transport_events: mpsc::Receiver<TransportEvent>,
        engine: Arc<dyn RtcEngine>,
        capture: Arc<dyn MediaCapture>,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let route: Route = Arc::new(RwLock::new(None));
        let router = tokio::spawn(route_transport_events(transport_events, Arc::clone(&route)));

        let client = Self {
            ctx: SessionContext {
                local,
                config,
                transport,
                engine,
                capture,
                events: event_tx,
            },
            current: Mutex::new(None),
            route,
            router,
        };
        (client, event_rx)
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.ctx.local
    }

    pub async fn current_channel(&self) -> Option<ChannelId> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|s| s.channel_id().clone())
    }

    /// Join `channel`. Joining the current channel again is a no-op unless
    /// its signaling transport dropped, in which case the stale session is
    /// left and the channel joined afresh.
    ///
    /// Fails without sending anything if local media cannot be acquired,
    /// and with a signaling error if the relay refuses or never answers.
    pub async fn join_channel(&self, channel: impl Into<ChannelId>) -> Result<()> {
        let channel = channel.into();
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            if *previous.channel_id() == channel && !previous.is_disconnected() {
                *current = Some(previous);
                return Ok(());
            }
            *self.route.write().await = None;
            previous.leave().await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.route.write().await = Some(tx.clone());
        match ChannelSession::join(&self.ctx, channel, tx, rx).await {
            Ok(session) => {
                *current = Some(session);
                Ok(())
            }
            Err(e) => {
                *self.route.write().await = None;
                Err(e)
            }
        }
    }

    /// Leave the current channel. Leaving when not joined is a no-op.
    pub async fn leave_channel(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        *self.route.write().await = None;
        if let Some(session) = current.take() {
            session.leave().await;
        }
        Ok(())
    }

    /// Mute or unmute the local audio towards every peer.
    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        let current = self.current.lock().await;
        current
            .as_ref()
            .ok_or(VoxError::NotJoined)?
            .set_muted(muted)
            .await
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> Result<()> {
        let current = self.current.lock().await;
        current
            .as_ref()
            .ok_or(VoxError::NotJoined)?
            .set_video_enabled(enabled)
            .await
    }

    /// Swap a local track on every connection, e.g. after a device change.
    pub async fn replace_track(&self, track: LocalTrack) -> Result<()> {
        let current = self.current.lock().await;
        current
            .as_ref()
            .ok_or(VoxError::NotJoined)?
            .replace_track(track)
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let current = self.current.lock().await;
        current.as_ref().ok_or(VoxError::NotJoined)?.snapshot().await
    }
}

impl Drop for VoiceClient {
    fn drop(&mut self) {
        self.router.abort();
    }
}

async fn route_transport_events(mut events: mpsc::Receiver<TransportEvent>, route: Route) {
    while let Some(event) = events.recv().await {
        let target = route.read().await.clone();
        match target {
            Some(session) => {
                if session.send(SessionCommand::Transport(event)).is_err() {
                    debug!("session gone, dropping transport event");
                }
            }
            None => debug!(?event, "no channel joined, dropping transport event"),
        }
    }
    debug!("transport event stream ended");
}
