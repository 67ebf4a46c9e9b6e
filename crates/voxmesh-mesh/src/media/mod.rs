//! Local capture: track handles, the capture collaborator, and the
//! per-session controller that owns the local stream.

mod controller;
mod types;

pub use controller::MediaSessionController;
pub use types::{LocalStream, LocalTrack, MediaCapture, MediaRequest, TrackKind};
