//! Error types for the viewer connection core

/// Result type alias using the viewer Error
pub type Result<T> = std::result::Result<T, Error>;

/// Failure classes reported through connection state snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Relay channel could not be opened, errored or closed
    Transport,
    /// Inbound relay message could not be parsed
    Parse,
    /// The relay sent an explicit `error` message
    SignalingProtocol,
    /// Local negotiation setup or SDP/ICE handling failed
    Negotiation,
    /// Configuration rejected before any connection attempt
    Config,
}

impl ErrorKind {
    /// Parse and config failures are not fixed by reconnecting
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Transport | ErrorKind::SignalingProtocol | ErrorKind::Negotiation
        )
    }
}

/// Errors that can occur in viewer connection operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebSocket relay channel error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Error reported by the relay server, shown verbatim
    #[error("{0}")]
    SignalingError(String),

    /// Malformed relay message
    #[error("Parse error: {0}")]
    ParseError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig(_) => ErrorKind::Config,
            Error::WebSocketError(_) | Error::IoError(_) => ErrorKind::Transport,
            Error::SignalingError(_) => ErrorKind::SignalingProtocol,
            Error::ParseError(_) | Error::SerializationError(_) => ErrorKind::Parse,
            Error::SdpError(_)
            | Error::IceCandidateError(_)
            | Error::PeerConnectionError(_)
            | Error::WebRtcError(_)
            | Error::OperationTimeout(_) => ErrorKind::Negotiation,
        }
    }

    /// Check if this error makes the session eligible for a reconnection attempt
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::WebRtcError(e.to_string())
    }
}
