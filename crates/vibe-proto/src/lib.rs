//! Wire protocol for the Vibe real-time layer.
//!
//! Frames consist of a fixed 16-byte binary header (parsed zero-copy) and a
//! CBOR-encoded payload. The header carries only routing-neutral metadata
//! (opcode, request id, payload size); identities are opaque strings and
//! travel inside payloads.
//!
//! # Components
//!
//! - [`FrameHeader`]: fixed header with magic/version/size validation
//! - [`Frame`]: header + raw payload bytes
//! - [`Opcode`]: operation codes for all frame types
//! - [`Payload`]: typed payload enum with CBOR encode/decode
//! - [`UserId`]: opaque string identity

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod errors;
mod frame;
mod header;
mod opcode;
pub mod payloads;
mod user;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
pub use payloads::{ErrorPayload, Payload};
pub use user::UserId;

/// ALPN protocol identifier for QUIC transport negotiation.
pub const ALPN_PROTOCOL: &[u8] = b"vibe";
