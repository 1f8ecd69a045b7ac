//! Error types for the signaling coordinator
//!
//! Most of these never reach the application: the coordinator logs and
//! drops transient channel failures, protocol violations and single-operation
//! capability failures. Only [`Error::MissingCredentials`] and
//! [`Error::InvalidConfig`] surface from [`crate::SignalingCoordinator::start`].

/// Result type alias using the coordinator Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while signaling or negotiating a call
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No session identity available; the coordinator stays inert
    #[error("No session credentials available")]
    MissingCredentials,

    /// WebSocket transport error (handshake, read, write)
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Signaling channel rejected the handshake (bad or expired token)
    #[error("Signaling handshake rejected with HTTP {0}")]
    HandshakeRejected(u16),

    /// Wire channel is not open
    #[error("Signaling channel is not open")]
    ChannelClosed,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The remote party sent a message that does not fit the negotiation state
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Relay credential endpoint failed or returned garbage
    #[error("Relay credentials error: {0}")]
    RelayCredentialsError(String),

    /// Operation is not valid in the current negotiation state
    #[error("Invalid negotiation state: {0}")]
    InvalidState(String),

    /// Operation was abandoned because the call was torn down
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::WebSocketError(_)
                | Error::HandshakeRejected(_)
                | Error::ChannelClosed
                | Error::RelayCredentialsError(_)
                | Error::IoError(_)
        )
    }

    /// Check if the remote party misbehaved rather than this side failing
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::ProtocolViolation(_))
    }

    /// Check if a local negotiation capability failed (SDP, ICE, tracks)
    pub fn is_capability_failure(&self) -> bool {
        matches!(
            self,
            Error::PeerConnectionError(_)
                | Error::SdpError(_)
                | Error::IceCandidateError(_)
                | Error::MediaTrackError(_)
                | Error::WebRtcError(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::WebRtcError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Http(response) => Error::HandshakeRejected(response.status().as_u16()),
            other => Error::WebSocketError(other.to_string()),
        }
    }
}
