use std::io;

#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("a session is already running")]
    AlreadyActive,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("audio error: {0}")]
    Audio(String),

    #[error("resample error: {0}")]
    Resample(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl LiveError {
    /// Whether the error ends the session it was raised in.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Transport(_) | Self::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, LiveError>;
