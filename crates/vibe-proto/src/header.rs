//! Frame header implementation with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 16-byte structure serialized as raw binary
//! (Big Endian). The server routes frames on the opcode alone without
//! touching the payload, so the header carries no variable-length data.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Fixed 16-byte frame header (Big Endian network byte order).
///
/// Fields are stored as raw byte arrays to avoid alignment issues in the
/// packed representation. Identities intentionally do not appear here: they
/// are opaque strings and live in the CBOR payload.
///
/// # Security
///
/// The `#[repr(C, packed)]` layout with zerocopy traits means the struct can
/// be cast from untrusted network bytes without undefined behavior - every
/// 16-byte pattern is a structurally valid bit pattern. Validation (magic,
/// version, payload size cap) happens in [`FrameHeader::from_bytes`].
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    /// 0x56494245 ("VIBE" in ASCII)
    magic: [u8; 4],
    /// Protocol version, currently 0x01
    version: u8,
    /// Reserved flags byte, must be zero
    flags: u8,
    /// u16 operation code
    pub(crate) opcode: [u8; 2],
    /// u32 client nonce for request/response correlation
    request_id: [u8; 4],
    /// u32 payload length
    pub(crate) payload_size: [u8; 4],
}

impl FrameHeader {
    /// Size of the serialized header (16 bytes).
    pub const SIZE: usize = 16;

    /// Magic number: "VIBE" in ASCII (0x56494245).
    pub const MAGIC: u32 = 0x5649_4245;

    /// Current protocol version.
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (1 MB).
    ///
    /// Presence snapshots and notifications are small; the cap bounds memory
    /// committed per frame before payload validation.
    pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

    /// Create a new header with the specified opcode.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            flags: 0,
            opcode: opcode.to_u16().to_be_bytes(),
            request_id: [0; 4],
            payload_size: [0; 4],
        }
    }

    /// Parse a header from network bytes (zero-copy).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if the buffer is under 16 bytes
    /// - `ProtocolError::InvalidMagic` if the magic number is wrong
    /// - `ProtocolError::UnsupportedVersion` for unknown versions
    /// - `ProtocolError::ReservedFlags` if the reserved flags byte is set
    /// - `ProtocolError::PayloadTooLarge` if the claimed size exceeds the cap
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let (header, _rest) = Self::ref_from_prefix(bytes).map_err(|_| {
            ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() }
        })?;
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.magic() != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }
        if self.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }
        if self.flags != 0 {
            return Err(ProtocolError::ReservedFlags(self.flags));
        }
        let claimed = self.payload_size();
        if claimed > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: claimed as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }
        Ok(())
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(IntoBytes::as_bytes(self));
        out
    }

    /// Protocol magic number.
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// Protocol version byte.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Operation code as raw u16.
    #[must_use]
    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes(self.opcode)
    }

    /// Operation code as enum. `None` if unrecognized.
    #[must_use]
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode())
    }

    /// Client-assigned nonce for request/response correlation.
    #[must_use]
    pub fn request_id(&self) -> u32 {
        u32::from_be_bytes(self.request_id)
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Set the client request nonce for response correlation.
    pub fn set_request_id(&mut self, request_id: u32) {
        self.request_id = request_id.to_be_bytes();
    }

    /// Set the payload size.
    pub fn set_payload_size(&mut self, size: u32) {
        self.payload_size = size.to_be_bytes();
    }
}

// Debug and PartialEq are written by hand, the packed repr rules out deriving
// them.
impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FrameHeader {{ magic: {:#010x}, version: {}, opcode: {:#06x}, request_id: {}, \
             payload_size: {} }}",
            self.magic(),
            self.version(),
            self.opcode(),
            self.request_id(),
            self.payload_size()
        )
    }
}

impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        IntoBytes::as_bytes(self) == IntoBytes::as_bytes(other)
    }
}

impl Eq for FrameHeader {}
