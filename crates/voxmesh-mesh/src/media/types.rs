use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use voxmesh_common::{new_short_id, MediaError, StreamHandle};
use voxmesh_config::MediaConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Handle to a captured local track.
///
/// Clones share the `enabled` flag. Every peer connection holds a clone, so
/// flipping the flag mutes the track towards every peer at once. Only
/// [`MediaSessionController`](super::MediaSessionController) flips it.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(kind: TrackKind) -> Self {
        Self::with_id(format!("{kind}-{}", new_short_id()), kind)
    }

    pub fn with_id(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Capture pipelines check this before writing samples.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

/// The session's local stream: at most one track per kind.
#[derive(Debug, Clone)]
pub struct LocalStream {
    pub handle: StreamHandle,
    pub tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        Self {
            handle: StreamHandle::generate(),
            tracks,
        }
    }

    pub fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaRequest {
    pub audio: bool,
    pub video: bool,
}

impl MediaRequest {
    pub fn from_config(config: &MediaConfig) -> Self {
        Self {
            audio: config.audio,
            video: config.video,
        }
    }
}

impl Default for MediaRequest {
    fn default() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }
}

/// Device access. Implementations own the actual capture devices.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn acquire_local_stream(&self, request: MediaRequest) -> Result<LocalStream, MediaError>;

    async fn acquire_track(&self, kind: TrackKind) -> Result<LocalTrack, MediaError>;

    async fn stop_stream(&self, stream: &LocalStream);
}
