//! # Error Types
//!
//! Custom error types for Robot Link using `thiserror`.

use thiserror::Error;

/// Main error type for Robot Link
#[derive(Debug, Error)]
pub enum AgentError {
    /// No usable motor controller was found or it could not be claimed
    #[error("No usable motor controller found (tried: {0})")]
    DeviceUnavailable(String),

    /// Serial write did not complete in time
    #[error("Serial write did not complete within {0} ms")]
    WriteTimeout(u64),

    /// Serial I/O failure on an open port
    #[error("Serial error: {0}")]
    Serial(String),

    /// Signaling socket dropped or could not be established
    #[error("Signaling disconnected: {0}")]
    SignalingDisconnected(String),

    /// Signaling client has been shut down permanently
    #[error("Signaling client has been shut down")]
    SignalingClosed,

    /// Peer session negotiation failed
    #[error("Negotiation failure: {0}")]
    NegotiationFailure(String),

    /// JSON decode failure on the signaling or data channel wire
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<webrtc::Error> for AgentError {
    fn from(e: webrtc::Error) -> Self {
        AgentError::NegotiationFailure(e.to_string())
    }
}

/// Result type alias for Robot Link
pub type Result<T> = std::result::Result<T, AgentError>;
