use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("signaling transport is not connected")]
    NotConnected,

    #[error("signaling transport closed")]
    Closed,

    #[error("failed to encode signaling message: {0}")]
    Encode(String),

    #[error("signaling protocol error: {0}")]
    Protocol(String),

    #[error("join refused by relay: {0}")]
    Refused(String),

    #[error("timed out waiting for the relay to answer the join")]
    Timeout,
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media permission denied: {0}")]
    PermissionDenied(String),

    #[error("media device busy: {0}")]
    DeviceBusy(String),

    #[error("a local stream is already active")]
    AlreadyActive,

    #[error("no active local stream")]
    NoActiveStream,

    #[error("capture error: {0}")]
    Capture(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to create connection: {0}")]
    Connection(String),

    #[error("negotiation error: {0}")]
    Negotiation(String),

    #[error("ice candidate rejected: {0}")]
    Candidate(String),

    #[error("track error: {0}")]
    Track(String),

    #[error("connection closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum VoxError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("not joined to a voice channel")]
    NotJoined,

    #[error("channel session closed")]
    SessionClosed,

    #[error("{0}")]
    Other(String),
}
