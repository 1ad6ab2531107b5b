//! Session management payload types.
//!
//! Handshake, graceful disconnect, and keepalive. `Ping`/`Pong` carry no
//! payload and have no struct here.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// Client handshake.
///
/// The first frame a client sends. The auth token is resolved by the
/// server's authentication collaborator; a token that does not resolve to an
/// identity causes the connection to be refused with an error frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version the client speaks.
    pub version: u8,

    /// Opaque authentication token from the session subsystem.
    pub auth_token: String,
}

/// Server handshake response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
    /// Session id assigned by the server for this connection.
    pub session_id: u64,

    /// The identity the auth token resolved to.
    pub user: UserId,
}

/// Graceful disconnect notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Human-readable reason for disconnecting.
    pub reason: String,
}
