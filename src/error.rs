//! # Error Types
//!
//! Error handling for framing, connections and listeners.
//!
//! ## Error Categories
//! - **Lifecycle misuse**: `AlreadyRunning`, `NotRunning`, `NotConnected`
//! - **Peer faults**: `ConnectionReset`, `ProtocolViolation`
//! - **Internal**: `LateCompletion` (never surfaced to consumers)
//! - **Payload convention**: `MalformedPayload`, `UnexpectedMessage`, `Serialization`
//! - **Configuration**: `ConfigError`
//!
//! Faults inside a connection's receive or send path never escape as errors;
//! they are turned into a single [`DisconnectReason`] delivered with the
//! `Disconnected` event.
//!
//! ## Example Usage
//! ```rust
//! use packet_socket::error::{ProtocolError, Result};
//! use packet_socket::core::packet::{decode_length, LENGTH_PREFIX_SIZE};
//!
//! fn declared_length(header: &[u8]) -> Result<u32> {
//!     if header.len() < LENGTH_PREFIX_SIZE {
//!         return Err(ProtocolError::ProtocolViolation("short header".into()));
//!     }
//!     Ok(decode_length(&[header[0], header[1], header[2], header[3]]))
//! }
//!
//! assert_eq!(declared_length(&[5, 0, 0, 0]).unwrap(), 5);
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Lifecycle errors
    pub const ERR_ALREADY_RUNNING: &str = "Already running";
    pub const ERR_NOT_RUNNING: &str = "Not running";
    pub const ERR_NOT_CONNECTED: &str = "Not connected";

    /// Framing errors
    pub const ERR_ZERO_LENGTH_FRAME: &str = "Zero-length frames are not allowed";
    pub const ERR_FRAME_TOO_LARGE_FOR_WIRE: &str = "Payload does not fit in a 32-bit length prefix";

    /// Connection errors
    pub const ERR_CONNECTION_RESET: &str = "Connection reset by peer";
    pub const ERR_MANUAL_DISCONNECT: &str = "Manual disconnect";
    pub const ERR_LISTENER_STOPPED: &str = "Listener stopped";
    pub const ERR_SEND_QUEUE_FULL: &str = "Send queue full, peer is not reading";

    /// Payload reader errors
    pub const ERR_UNEXPECTED_END: &str = "Unexpected end of payload";
    pub const ERR_INVALID_UTF8: &str = "String is not valid UTF-8";
    pub const ERR_VARINT_OVERFLOW: &str = "7-bit encoded length is too long";

    /// Dispatcher errors
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";
    pub const ERR_EMPTY_PAYLOAD: &str = "Payload has no tag byte";
}

// ProtocolError is the primary error type for all crate operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("{}", constants::ERR_ALREADY_RUNNING)]
    AlreadyRunning,

    #[error("{}", constants::ERR_NOT_RUNNING)]
    NotRunning,

    #[error("{}", constants::ERR_CONNECTION_RESET)]
    ConnectionReset,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("{}", constants::ERR_NOT_CONNECTED)]
    NotConnected,

    #[error("Completion fired after the connection was torn down")]
    LateCompletion,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unexpected message tag: {0}")]
    UnexpectedMessage(u8),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Why a connection ended, as reported with the `Disconnected` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called locally.
    Requested,
    /// The peer closed the stream.
    ConnectionReset,
    /// The peer sent a frame that breaks the framing rules.
    ProtocolViolation(String),
    /// Any other transport failure.
    Io(String),
    /// The owning listener was stopped.
    ListenerStopped,
}

impl DisconnectReason {
    /// True when the peer, not the local side, caused the disconnect.
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self,
            DisconnectReason::ConnectionReset
                | DisconnectReason::ProtocolViolation(_)
                | DisconnectReason::Io(_)
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => f.write_str(constants::ERR_MANUAL_DISCONNECT),
            DisconnectReason::ConnectionReset => f.write_str(constants::ERR_CONNECTION_RESET),
            DisconnectReason::ProtocolViolation(msg) => write!(f, "Protocol violation: {msg}"),
            DisconnectReason::Io(msg) => write!(f, "I/O error: {msg}"),
            DisconnectReason::ListenerStopped => f.write_str(constants::ERR_LISTENER_STOPPED),
        }
    }
}

impl From<&ProtocolError> for DisconnectReason {
    fn from(err: &ProtocolError) -> Self {
        match err {
            ProtocolError::ConnectionReset => DisconnectReason::ConnectionReset,
            ProtocolError::ProtocolViolation(msg) => {
                DisconnectReason::ProtocolViolation(msg.clone())
            }
            ProtocolError::Io(e) => match e.kind() {
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::UnexpectedEof => DisconnectReason::ConnectionReset,
                _ => DisconnectReason::Io(e.to_string()),
            },
            other => DisconnectReason::Io(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_from_protocol_violation_keeps_message() {
        let err = ProtocolError::ProtocolViolation("too big".into());
        assert_eq!(
            DisconnectReason::from(&err),
            DisconnectReason::ProtocolViolation("too big".into())
        );
    }

    #[test]
    fn test_reset_like_io_errors_map_to_connection_reset() {
        let err = ProtocolError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(DisconnectReason::from(&err), DisconnectReason::ConnectionReset);

        let err = ProtocolError::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(DisconnectReason::from(&err), DisconnectReason::Io(_)));
    }

    #[test]
    fn test_peer_fault_classification() {
        assert!(!DisconnectReason::Requested.is_peer_fault());
        assert!(!DisconnectReason::ListenerStopped.is_peer_fault());
        assert!(DisconnectReason::ConnectionReset.is_peer_fault());
        assert_eq!(DisconnectReason::Requested.to_string(), "Manual disconnect");
    }

    #[test]
    fn test_lifecycle_messages_come_from_constants() {
        assert_eq!(
            ProtocolError::AlreadyRunning.to_string(),
            constants::ERR_ALREADY_RUNNING
        );
        assert_eq!(ProtocolError::NotRunning.to_string(), constants::ERR_NOT_RUNNING);
        assert_eq!(ProtocolError::NotConnected.to_string(), constants::ERR_NOT_CONNECTED);
        assert_eq!(
            ProtocolError::ConnectionReset.to_string(),
            DisconnectReason::ConnectionReset.to_string()
        );
    }
}
