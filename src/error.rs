use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Media access error: {0}")]
    MediaAccess(String),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Connection to {peer} lost: {state}")]
    ConnectionFatal { peer: String, state: String },

    #[error("Refusing to create a peer connection to self ({0})")]
    SelfConnection(String),

    #[error("No room joined")]
    NoRoom,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),
}

/// Recovery class of an error
///
/// Handlers use this to decide between reconnecting, falling back to
/// view-only mode, releasing an offer for retry, or tearing a peer down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Channel closed or unreachable, recovered by reconnecting
    Transport,
    /// Capture device denied or unavailable, recovered by going view-only
    MediaAccess,
    /// SDP/ICE apply failure, retried on the next session update
    Negotiation,
    /// The peer connection itself is gone
    ConnectionFatal,
    /// Everything else (configuration, programming errors, cancellation)
    Other,
}

impl AppError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Transport(_) | AppError::ChannelClosed => ErrorKind::Transport,
            AppError::MediaAccess(_) => ErrorKind::MediaAccess,
            AppError::Negotiation(_) | AppError::WebRtcError(_) => ErrorKind::Negotiation,
            AppError::ConnectionFatal { .. } => ErrorKind::ConnectionFatal,
            AppError::SelfConnection(_)
            | AppError::NoRoom
            | AppError::Cancelled
            | AppError::Config(_)
            | AppError::Io(_)
            | AppError::Serialization(_) => ErrorKind::Other,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
