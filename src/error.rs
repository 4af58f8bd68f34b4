//! # Protocol Error Types
//!
//! Errors are classified by how a channel reacts to them: transport failures
//! end the channel, framing failures stall it, unknown message types are
//! skipped.

use thiserror::Error;

/// Main error type for protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Header declares a total size below the header itself
    #[error("Frame too small: total size {size} < header size {min}")]
    FrameTooSmall { size: usize, min: usize },

    /// Header declares a total size above the protocol ceiling
    #[error("Frame exceeds maximum size: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Body is shorter than its fixed layout requires
    #[error("Truncated {what} body: {actual} < {expected} bytes")]
    TruncatedBody {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Inner payload size disagrees with the bytes actually read
    #[error("Payload size mismatch: declared {declared}, available {available}")]
    PayloadSizeMismatch { declared: usize, available: usize },

    /// Message type byte outside the known set
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Payload cannot be carried in a single frame
    #[error("Payload exceeds maximum size: {size} > {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Server answered the login with a non-accepting status
    #[error("Login rejected with status {0}")]
    LoginRejected(u16),

    /// Peer closed the channel
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// Name resolution produced nothing usable
    #[error("Could not resolve {0}")]
    Resolve(String),

    /// Invalid state transition
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration file could not be parsed or written
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Malformed framing; the reader must stop consuming this channel
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::FrameTooSmall { .. }
                | ProtocolError::FrameTooLarge { .. }
                | ProtocolError::TruncatedBody { .. }
                | ProtocolError::PayloadSizeMismatch { .. }
        )
    }

    /// Channel-level failure; the channel is unusable
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::IoError(_) | ProtocolError::ConnectionClosed
        )
    }
}

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

impl From<toml::de::Error> for ProtocolError {
    fn from(e: toml::de::Error) -> Self {
        ProtocolError::ConfigError(e.to_string())
    }
}

impl From<toml::ser::Error> for ProtocolError {
    fn from(e: toml::ser::Error) -> Self {
        ProtocolError::ConfigError(e.to_string())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::ConfigError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let framing = ProtocolError::FrameTooLarge { size: 9999, max: 512 };
        assert!(framing.is_framing());
        assert!(!framing.is_transport());

        assert!(ProtocolError::ConnectionClosed.is_transport());
        assert!(!ProtocolError::UnknownMessageType(7).is_framing());
        assert!(!ProtocolError::UnknownMessageType(7).is_transport());
    }

    #[test]
    fn test_display() {
        let err = ProtocolError::PayloadSizeMismatch {
            declared: 10,
            available: 3,
        };
        assert_eq!(
            err.to_string(),
            "Payload size mismatch: declared 10, available 3"
        );
    }
}
