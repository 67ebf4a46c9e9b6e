//! Per-channel session: one actor task owning the membership tracker, the
//! local media and the orchestrator, fed by a single ordered queue.

mod actor;
mod handle;
mod types;

pub use types::{PeerSummary, SessionConfig, SessionEvent, SessionSnapshot};

pub(crate) use handle::ChannelSession;
pub(crate) use types::{publish, SessionCommand, SessionContext};
