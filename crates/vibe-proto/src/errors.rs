//! Protocol error types.
//!
//! Errors cover structural frame validation (size, magic, version) and CBOR
//! payload codec failures. All variants are `PartialEq` so tests can assert
//! on exact errors.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding frames and payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too short to contain a complete frame header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum number of bytes required
        expected: usize,
        /// Number of bytes available
        actual: usize,
    },

    /// Magic number did not match the protocol constant.
    #[error("invalid magic number")]
    InvalidMagic,

    /// Protocol version is not supported by this implementation.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Reserved flags byte was not zero.
    #[error("reserved flags byte set: {0:#04x}")]
    ReservedFlags(u8),

    /// Payload exceeds the maximum allowed size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Claimed or actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Header claims a different payload size than the buffer provides.
    #[error("payload size mismatch: header claims {claimed}, buffer has {actual}")]
    PayloadSizeMismatch {
        /// Size claimed by the header
        claimed: usize,
        /// Size actually present
        actual: usize,
    },

    /// CBOR serialization failed.
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed.
    #[error("CBOR decode error: {0}")]
    CborDecode(String),
}
