use std::sync::Arc;

use tracing::{debug, info};
use voxmesh_common::MediaError;

use super::types::{LocalStream, LocalTrack, MediaCapture, MediaRequest, TrackKind};

/// Owns the session's local stream.
///
/// Toggles take effect on the shared track handles before the call returns.
/// Whether a change needs renegotiation is reported to the caller, which
/// pushes the new track set to every peer connection.
pub struct MediaSessionController {
    capture: Arc<dyn MediaCapture>,
    stream: Option<LocalStream>,
    muted: bool,
}

impl MediaSessionController {
    pub fn new(capture: Arc<dyn MediaCapture>) -> Self {
        Self {
            capture,
            stream: None,
            muted: false,
        }
    }

    /// Acquire the local stream. Fails with `AlreadyActive` if one is held.
    pub async fn acquire(&mut self, request: MediaRequest) -> Result<LocalStream, MediaError> {
        if self.stream.is_some() {
            return Err(MediaError::AlreadyActive);
        }
        let stream = self.capture.acquire_local_stream(request).await?;
        info!(
            stream = %stream.handle,
            tracks = stream.tracks.len(),
            "acquired local stream"
        );
        self.muted = false;
        self.stream = Some(stream.clone());
        Ok(stream)
    }

    pub fn set_muted(&mut self, muted: bool) -> Result<(), MediaError> {
        let stream = self.stream.as_ref().ok_or(MediaError::NoActiveStream)?;
        for track in stream.tracks.iter().filter(|t| t.kind() == TrackKind::Audio) {
            track.set_enabled(!muted);
        }
        self.muted = muted;
        debug!(muted, "local audio toggled");
        Ok(())
    }

    /// Enable or disable outgoing video. Returns `true` when a video track
    /// had to be acquired, i.e. the track set changed.
    pub async fn set_video_enabled(&mut self, enabled: bool) -> Result<bool, MediaError> {
        let stream = self.stream.as_mut().ok_or(MediaError::NoActiveStream)?;
        if let Some(video) = stream.track(TrackKind::Video) {
            video.set_enabled(enabled);
            return Ok(false);
        }
        if !enabled {
            return Ok(false);
        }

        let track = self.capture.acquire_track(TrackKind::Video).await?;
        info!(track = track.id(), "acquired video track");
        stream.tracks.push(track);
        Ok(true)
    }

    /// Swap the track of the same kind, e.g. after a device change. The new
    /// track inherits the enabled flag. Returns the replaced track.
    pub fn replace_track(&mut self, track: LocalTrack) -> Result<LocalTrack, MediaError> {
        let stream = self.stream.as_mut().ok_or(MediaError::NoActiveStream)?;
        let kind = track.kind();
        let slot = stream
            .tracks
            .iter_mut()
            .find(|t| t.kind() == kind)
            .ok_or_else(|| MediaError::Capture(format!("no {kind} track to replace")))?;

        track.set_enabled(slot.is_enabled());
        let old = std::mem::replace(slot, track);
        info!(old = old.id(), new = slot.id(), %kind, "replaced local track");
        Ok(old)
    }

    /// Stop the stream. Calling it again is a no-op.
    pub async fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.capture.stop_stream(&stream).await;
            info!(stream = %stream.handle, "stopped local stream");
        }
    }

    pub fn tracks(&self) -> Vec<LocalTrack> {
        self.stream
            .as_ref()
            .map(|s| s.tracks.clone())
            .unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn video_enabled(&self) -> bool {
        self.stream
            .as_ref()
            .and_then(|s| s.track(TrackKind::Video))
            .is_some_and(|t| t.is_enabled())
    }
}
