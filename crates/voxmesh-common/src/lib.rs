pub mod errors;
pub mod id;
pub mod types;

pub use errors::{ConfigError, EngineError, MediaError, SignalingError, VoxError};
pub use id::{new_id, new_short_id};
pub use types::{ChannelId, PeerId, StreamHandle};

pub type Result<T> = std::result::Result<T, VoxError>;
