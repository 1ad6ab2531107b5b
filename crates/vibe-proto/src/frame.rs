//! Frame type combining header and payload.
//!
//! A `Frame` is the transport-layer packet: a 16-byte raw binary header plus
//! variable-length payload bytes (already CBOR-encoded). It is a pure data
//! holder; for typed access see `Payload::into_frame()` and
//! `Payload::from_frame()`.

use bytes::{BufMut, Bytes};

use crate::{
    FrameHeader,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame (transport layer).
///
/// Layout on the wire:
/// `[FrameHeader: 16 bytes, raw binary] + [payload: variable bytes]`
///
/// # Invariants
///
/// - `payload.len()` MUST match `header.payload_size()`. Enforced by
///   [`Frame::new`] and verified by [`Frame::decode`].
/// - `payload.len()` MUST NOT exceed [`FrameHeader::MAX_PAYLOAD_SIZE`].
///   Violations are rejected during encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header (16 bytes)
    pub header: FrameHeader,

    /// Raw payload bytes (already CBOR-encoded)
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame with automatic `payload_size` calculation.
    ///
    /// The header's `payload_size` field is set to match the actual payload
    /// length, so a mismatched frame cannot be constructed.
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        // INVARIANT: payload length fits in u32 - Bytes is bounded by
        // isize::MAX and the protocol cap (1 MB) is far below u32::MAX.
        let payload_len = payload.len() as u32;
        header.payload_size = payload_len.to_be_bytes();

        debug_assert_eq!(header.payload_size(), payload_len);

        Self { header, payload }
    }

    /// Encode the frame into a buffer.
    ///
    /// Writes `[header (16 bytes)] + [payload (variable)]`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if the payload exceeds the 1 MB cap
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Decode a frame from a byte buffer.
    ///
    /// The buffer must contain the complete frame: a valid header followed by
    /// exactly `payload_size` payload bytes.
    ///
    /// # Errors
    ///
    /// - any header validation error from [`FrameHeader::from_bytes`]
    /// - `ProtocolError::PayloadSizeMismatch` if the buffer length does not
    ///   match the header's claim
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = *FrameHeader::from_bytes(bytes)?;
        let claimed = header.payload_size() as usize;
        let actual = bytes.len() - FrameHeader::SIZE;

        if claimed != actual {
            return Err(ProtocolError::PayloadSizeMismatch { claimed, actual });
        }

        let payload = Bytes::copy_from_slice(&bytes[FrameHeader::SIZE..]);
        Ok(Self { header, payload })
    }

    /// Total encoded size in bytes (header + payload).
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Opcode;

    #[test]
    fn new_sets_payload_size() {
        let frame = Frame::new(FrameHeader::new(Opcode::Ping), vec![1u8, 2, 3]);
        assert_eq!(frame.header.payload_size(), 3);
        assert_eq!(frame.encoded_len(), FrameHeader::SIZE + 3);
    }

    #[test]
    fn encode_decode_round_trip() {
        let frame = Frame::new(FrameHeader::new(Opcode::Notification), vec![9u8; 42]);

        let mut buf = Vec::new();
        frame.encode(&mut buf).unwrap();

        let decoded = Frame::decode(&buf).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let frame = Frame::new(FrameHeader::new(Opcode::Hello), vec![0u8; 10]);

        let mut buf = Vec::new();
        frame.encode(&mut buf).unwrap();
        buf.truncate(buf.len() - 4);

        assert!(matches!(
            Frame::decode(&buf),
            Err(ProtocolError::PayloadSizeMismatch { claimed: 10, actual: 6 })
        ));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let mut header = FrameHeader::new(Opcode::SendMessage);
        header.set_payload_size(FrameHeader::MAX_PAYLOAD_SIZE + 1);
        let frame = Frame {
            header,
            payload: Bytes::from(vec![0u8; FrameHeader::MAX_PAYLOAD_SIZE as usize + 1]),
        };

        let mut buf = Vec::new();
        assert!(matches!(frame.encode(&mut buf), Err(ProtocolError::PayloadTooLarge { .. })));
    }
}
