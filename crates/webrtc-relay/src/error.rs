//! Error types for the WebRTC relay

/// Result type alias using the relay Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while relaying a call
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Remote ICE configuration could not be fetched or decoded
    #[error("RTC config fetch failed: {0}")]
    ConfigFetchError(String),

    /// Signaling channel error (read/write on a closed or broken channel)
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Remote offer could not be parsed or applied
    #[error("Remote description rejected: {0}")]
    RemoteDescriptionError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// External pipeline process error
    #[error("Process error: {0}")]
    ProcessError(String),

    /// RTP relay socket error
    #[error("Relay error: {0}")]
    RelayError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Check if this error aborts the offer being handled
    ///
    /// Session/track creation and remote description failures leave no
    /// usable call behind; everything else is dropped per message.
    pub fn is_fatal_to_call(&self) -> bool {
        matches!(
            self,
            Error::PeerConnectionError(_)
                | Error::MediaTrackError(_)
                | Error::RemoteDescriptionError(_)
                | Error::WebRtcError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_) | Error::ConfigFetchError(_))
    }
}
