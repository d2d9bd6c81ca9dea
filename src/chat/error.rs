//! Chat error types.

use thiserror::Error;

/// Errors that can occur during chat operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// A send or session query was attempted outside the `Active` state.
    #[error("Not connected")]
    NotConnected,

    /// Self-targeting, or a peer that is not on the current roster.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Public key bytes that cannot be used for key agreement.
    #[error("Invalid peer key: {0}")]
    InvalidPeerKey(String),

    /// AEAD tag did not verify (tampered payload or wrong key).
    #[error("Authentication failure")]
    AuthenticationFailure,

    /// The underlying connection closed; terminal for the session.
    #[error("Connection closed: {reason}")]
    ConnectionClosed {
        /// Human readable close reason.
        reason: String,
    },

    /// Display name was empty after trimming.
    #[error("Display name must not be empty")]
    InvalidName,

    /// `connect` was requested while a session is still connecting or active.
    #[error("Already connected")]
    AlreadyConnected,

    /// Outbound message exceeds the configured length limit.
    #[error("Message too long (max: {max}, got: {got})")]
    MessageTooLong {
        /// Configured maximum in characters.
        max: usize,
        /// Length of the rejected message.
        got: usize,
    },

    /// Frame could not be parsed into a valid envelope.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Transport error.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for ChatError {
    fn from(e: std::io::Error) -> Self {
        ChatError::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::MalformedEnvelope(e.to_string())
    }
}

impl ChatError {
    /// Errors that are rejected at the call boundary without touching session state.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ChatError::NotConnected
                | ChatError::InvalidTarget(_)
                | ChatError::InvalidName
                | ChatError::AlreadyConnected
                | ChatError::MessageTooLong { .. }
        )
    }
}
