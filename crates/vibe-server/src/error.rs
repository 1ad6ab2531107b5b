//! Server error types.
//!
//! Strongly-typed errors for server operations: session management, store
//! access, transport, and runtime configuration.

use thiserror::Error;

use crate::{auth::AuthError, stores::StoreError};

/// Errors that can occur during server operations.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Session not found in the driver.
    ///
    /// Occurs when an event names a session id the driver does not know.
    /// May be transient if the session was just disconnected.
    #[error("session not found: {0}")]
    SessionNotFound(u64),

    /// Session id already registered.
    ///
    /// Session ids are runtime-assigned and unique; a collision is a logic
    /// bug.
    #[error("session already exists: {0}")]
    SessionAlreadyExists(u64),

    /// Session state machine rejected an operation.
    #[error("session {session_id} failed: {reason}")]
    SessionFailed {
        /// Session that failed
        session_id: u64,
        /// Error message
        reason: String,
    },

    /// Handshake authentication failed.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Store operation failed.
    ///
    /// Wraps errors from the social-graph or message-store backend. May be
    /// transient (I/O) or fatal (serialization).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Frame encoding/decoding error.
    ///
    /// Invalid frame format received from a client or failure to encode a
    /// response. Fatal for that frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Low-level network/QUIC error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid runtime configuration (bind address, TLS material).
    #[error("config error: {0}")]
    Config(String),

    /// Internal runtime failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<vibe_proto::ProtocolError> for ServerError {
    fn from(err: vibe_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ServerError::SessionNotFound(42);
        assert_eq!(err.to_string(), "session not found: 42");

        let err = ServerError::SessionFailed { session_id: 1, reason: "timeout".to_string() };
        assert_eq!(err.to_string(), "session 1 failed: timeout");

        let err = ServerError::Auth(AuthError::Unauthenticated);
        assert_eq!(err.to_string(), "authentication failed: auth token did not resolve to an identity");
    }
}
