//! Session-layer error taxonomy.
//!
//! Typed errors instead of `std::io::Error` so callers can tell a peer
//! misbehaving from a timeout, and recover accordingly. I/O conversions only
//! happen at the async boundary.

use std::{io, time::Duration};

use thiserror::Error;

use crate::session::SessionState;

/// Failures of the session state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The requested operation is not valid in the current state.
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// State at the time of the attempt.
        state: SessionState,
        /// Attempted operation.
        operation: String,
    },

    /// A frame arrived that the current state cannot accept.
    #[error("opcode {opcode:#06x} not acceptable in state {state:?}")]
    UnexpectedFrame {
        /// State when the frame arrived.
        state: SessionState,
        /// Opcode of the offending frame.
        opcode: u16,
    },

    /// The handshake did not complete in time.
    #[error("handshake timed out after {elapsed:?}")]
    HandshakeTimeout {
        /// Time spent waiting.
        elapsed: Duration,
    },

    /// No traffic within the idle window.
    #[error("idle for {elapsed:?}")]
    IdleTimeout {
        /// Time since the last frame.
        elapsed: Duration,
    },

    /// Peer speaks a protocol version we do not.
    #[error("peer protocol version {0} unsupported")]
    UnsupportedVersion(u8),

    /// Payload did not match the frame's opcode.
    #[error("opcode {opcode:#06x} payload was not a valid {expected}")]
    InvalidPayload {
        /// Payload type the opcode demands.
        expected: &'static str,
        /// Opcode on the frame.
        opcode: u16,
    },

    /// Frame parsing or validation failure.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Failure in the underlying transport.
    #[error("transport: {0}")]
    Transport(String),
}

impl SessionError {
    /// Whether retrying could plausibly succeed.
    ///
    /// Timeouts are transient. Everything else signals a broken or hostile
    /// peer and retrying would repeat the violation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::HandshakeTimeout { .. } | Self::IdleTimeout { .. })
    }
}

// Boundary conversion for async I/O call sites only.
impl From<SessionError> for io::Error {
    fn from(err: SessionError) -> Self {
        let kind = match &err {
            SessionError::HandshakeTimeout { .. } | SessionError::IdleTimeout { .. } => {
                io::ErrorKind::TimedOut
            },
            SessionError::InvalidState { .. }
            | SessionError::UnexpectedFrame { .. }
            | SessionError::UnsupportedVersion(_)
            | SessionError::Protocol(_)
            | SessionError::InvalidPayload { .. } => io::ErrorKind::InvalidData,
            SessionError::Transport(_) => io::ErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<vibe_proto::ProtocolError> for SessionError {
    fn from(err: vibe_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
