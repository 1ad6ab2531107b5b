//! CBOR-encoded protocol messages.
//!
//! Frame headers are raw binary for cheap routing, but payloads use CBOR for
//! type safety and forward compatibility. The `Payload` enum covers all
//! message types: session management (Hello, Ping, etc.), server push events
//! (presence, notifications), and client triggers (messages, likes, follow
//! toggles).
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness). Round-trip encoding must produce identical values.

pub mod presence;
pub mod session;
pub mod social;

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads.
///
/// The payload type is determined by the `Opcode` in the frame header, so
/// only the inner struct content is serialized (no variant tag in CBOR).
///
/// # Security
///
/// - No Variant Tag: the variant discriminator is NOT serialized. The frame
///   header's opcode already identifies the payload type, which prevents
///   mismatched opcode/payload pairs.
///
/// - Exhaustive Matching: all methods use exhaustive `match` statements.
///   Adding a variant causes compile errors in `encode()`, `decode()`, and
///   `opcode()`, so no variant can be left unhandled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Session management
    /// Initial handshake
    Hello(session::Hello),
    /// Server response to Hello
    HelloReply(session::HelloReply),
    /// Graceful disconnect
    Goodbye(session::Goodbye),
    /// Ping for keepalive
    Ping,
    /// Pong response
    Pong,

    // Server push events
    /// Online-identity snapshot broadcast
    PresenceUpdate(presence::PresenceUpdate),
    /// Targeted like/message notification
    Notification(presence::Notification),

    // Client triggers
    /// Send a direct message
    SendMessage(social::SendMessage),
    /// Message persisted acknowledgement
    MessageAck(social::MessageAck),
    /// Like a post
    LikePost(social::LikePost),
    /// Toggle a follow edge
    FollowToggle(social::FollowToggle),
    /// Authoritative follow state after a toggle
    FollowToggleReply(social::FollowToggleReply),

    // Error frame
    /// Error response
    Error(ErrorPayload),
}

/// Error payload for error frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorPayload {
    /// Handshake token did not resolve to an identity.
    pub const UNAUTHENTICATED: u16 = 0x0001;
    /// Payload could not be decoded or had the wrong type.
    pub const INVALID_PAYLOAD: u16 = 0x0002;
    /// Social-graph store rejected or failed the operation.
    pub const GRAPH_ERROR: u16 = 0x0003;
    /// Message recipient no longer resolves to a valid profile.
    pub const STALE_RECIPIENT: u16 = 0x0004;
    /// Message store failed to persist the record.
    pub const STORE_ERROR: u16 = 0x0005;
    /// Frame was rejected by the server.
    pub const FRAME_REJECTED: u16 = 0x0006;

    /// Create an unauthenticated-handshake error.
    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self { code: Self::UNAUTHENTICATED, message: msg.into() }
    }

    /// Create an invalid payload error.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self { code: Self::INVALID_PAYLOAD, message: msg.into() }
    }

    /// Create a social-graph error.
    pub fn graph_error(msg: impl Into<String>) -> Self {
        Self { code: Self::GRAPH_ERROR, message: msg.into() }
    }

    /// Create a stale-recipient error.
    pub fn stale_recipient(recipient: impl std::fmt::Display) -> Self {
        Self {
            code: Self::STALE_RECIPIENT,
            message: format!("recipient not found: {recipient}"),
        }
    }

    /// Create a message-store error.
    pub fn store_error(msg: impl Into<String>) -> Self {
        Self { code: Self::STORE_ERROR, message: msg.into() }
    }

    /// Create a frame rejection error.
    pub fn frame_rejected(reason: impl Into<String>) -> Self {
        Self { code: Self::FRAME_REJECTED, message: reason.into() }
    }
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Hello(_) => Opcode::Hello,
            Self::HelloReply(_) => Opcode::HelloReply,
            Self::Goodbye(_) => Opcode::Goodbye,
            Self::Ping => Opcode::Ping,
            Self::Pong => Opcode::Pong,
            Self::PresenceUpdate(_) => Opcode::PresenceUpdate,
            Self::Notification(_) => Opcode::Notification,
            Self::SendMessage(_) => Opcode::SendMessage,
            Self::MessageAck(_) => Opcode::MessageAck,
            Self::LikePost(_) => Opcode::LikePost,
            Self::FollowToggle(_) => Opcode::FollowToggle,
            Self::FollowToggleReply(_) => Opcode::FollowToggleReply,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode the payload into a buffer.
    ///
    /// Serializes only the inner struct, NOT the variant tag: the frame
    /// header's opcode already identifies the payload type.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::Hello(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::HelloReply(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Goodbye(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Ping | Self::Pong => Ok(()), // Zero-byte payloads
            Self::PresenceUpdate(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Notification(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::SendMessage(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::MessageAck(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::LikePost(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::FollowToggle(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::FollowToggleReply(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Error(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode a payload from bytes based on its opcode.
    ///
    /// The size check happens BEFORE CBOR parsing begins, so the parser
    /// never processes maliciously large inputs.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed the 1 MB cap
    /// - `ProtocolError::CborDecode` if deserialization fails
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::Hello => Self::Hello(decode_inner(bytes)?),
            Opcode::HelloReply => Self::HelloReply(decode_inner(bytes)?),
            Opcode::Goodbye => Self::Goodbye(decode_inner(bytes)?),
            Opcode::Ping => Self::zero_byte(Self::Ping, bytes)?,
            Opcode::Pong => Self::zero_byte(Self::Pong, bytes)?,
            Opcode::PresenceUpdate => Self::PresenceUpdate(decode_inner(bytes)?),
            Opcode::Notification => Self::Notification(decode_inner(bytes)?),
            Opcode::SendMessage => Self::SendMessage(decode_inner(bytes)?),
            Opcode::MessageAck => Self::MessageAck(decode_inner(bytes)?),
            Opcode::LikePost => Self::LikePost(decode_inner(bytes)?),
            Opcode::FollowToggle => Self::FollowToggle(decode_inner(bytes)?),
            Opcode::FollowToggleReply => Self::FollowToggleReply(decode_inner(bytes)?),
            Opcode::Error => Self::Error(decode_inner(bytes)?),
        };

        Ok(payload)
    }

    /// Ping and Pong carry no body; reject frames that smuggle one in.
    fn zero_byte(variant: Self, bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            Ok(variant)
        } else {
            Err(ProtocolError::CborDecode(format!(
                "unexpected {}-byte body on a zero-byte opcode",
                bytes.len()
            )))
        }
    }

    /// Convert the payload into a transport frame.
    ///
    /// Encodes the payload to CBOR, sets the correct opcode in the header,
    /// and creates a `Frame` with automatic `payload_size` calculation.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, mut header: FrameHeader) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.opcode = self.opcode().to_u16().to_be_bytes();
        Ok(Frame::new(header, buf))
    }

    /// Parse a payload from a raw transport frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborDecode` if the opcode is invalid
    /// - `ProtocolError::CborDecode` if deserialization fails
    /// - `ProtocolError::PayloadTooLarge` if the payload exceeds the cap
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame.header.opcode_enum().ok_or_else(|| {
            ProtocolError::CborDecode(format!("Invalid opcode: {:#06x}", frame.header.opcode()))
        })?;
        Self::decode(opcode, &frame.payload)
    }
}

fn decode_inner<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserId;

    #[test]
    fn payload_ping_round_trip() {
        let payload = Payload::Ping;

        let frame = payload.clone().into_frame(FrameHeader::new(Opcode::Ping)).unwrap();
        assert!(frame.payload.is_empty());

        let decoded = Payload::from_frame(&frame).unwrap();
        assert_eq!(payload, decoded);
    }

    #[test]
    fn payload_presence_round_trip() {
        let payload = Payload::PresenceUpdate(presence::PresenceUpdate {
            online: vec![UserId::new("u-1"), UserId::new("u-2")],
        });

        let frame =
            payload.clone().into_frame(FrameHeader::new(Opcode::PresenceUpdate)).unwrap();
        let decoded = Payload::from_frame(&frame).unwrap();
        assert_eq!(payload, decoded);
    }

    #[test]
    fn payload_error_round_trip() {
        let payload = Payload::Error(ErrorPayload::unauthenticated("bad token"));

        let frame = payload.clone().into_frame(FrameHeader::new(Opcode::Error)).unwrap();
        let decoded = Payload::from_frame(&frame).unwrap();
        assert_eq!(payload, decoded);
    }

    #[test]
    fn into_frame_overrides_header_opcode() {
        // Header built with the wrong opcode gets corrected by into_frame.
        let payload = Payload::FollowToggle(social::FollowToggle { target: UserId::new("t") });
        let frame = payload.into_frame(FrameHeader::new(Opcode::Ping)).unwrap();

        assert_eq!(frame.header.opcode_enum(), Some(Opcode::FollowToggle));
    }

    #[test]
    fn ping_with_a_body_is_rejected() {
        for opcode in [Opcode::Ping, Opcode::Pong] {
            assert!(matches!(
                Payload::decode(opcode, b"junk"),
                Err(ProtocolError::CborDecode(_))
            ));
        }
    }

    #[test]
    fn decode_wrong_payload_type_fails() {
        let payload = Payload::Goodbye(session::Goodbye { reason: "done".to_string() });
        let mut buf = Vec::new();
        payload.encode(&mut buf).unwrap();

        // Goodbye bytes decoded as a Notification must fail, not misparse.
        assert!(matches!(
            Payload::decode(Opcode::Notification, &buf),
            Err(ProtocolError::CborDecode(_))
        ));
    }
}
