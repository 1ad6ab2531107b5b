//! Store error types.

use thiserror::Error;

/// Errors from social-graph and message-store backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend I/O failure (disk, database transaction).
    ///
    /// May be transient; the caller reports it to the client and keeps the
    /// connection alive.
    #[error("store i/o error: {0}")]
    Io(String),

    /// Record could not be encoded or decoded.
    ///
    /// Indicates corruption or a version mismatch. Not transient.
    #[error("store serialization error: {0}")]
    Serialization(String),

    /// An identity tried to follow itself.
    ///
    /// Rejected at the store boundary so no backend ever holds a self-edge.
    #[error("identity cannot follow itself: {0}")]
    SelfFollow(String),
}
