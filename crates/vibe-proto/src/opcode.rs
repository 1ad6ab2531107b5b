//! Operation codes for frame routing.

/// Frame operation code.
///
/// The opcode in the frame header determines how the frame is routed and
/// which payload type it carries. Session opcodes live in `0x000x`, server
/// push events in `0x001x`, client triggers in `0x002x`, and `0x00FF` is the
/// error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Client handshake (carries the auth token)
    Hello = 0x0001,
    /// Server handshake response (carries session id + resolved identity)
    HelloReply = 0x0002,
    /// Graceful disconnect
    Goodbye = 0x0003,
    /// Keepalive ping (zero-byte payload)
    Ping = 0x0004,
    /// Keepalive pong (zero-byte payload)
    Pong = 0x0005,

    /// Full online-identity snapshot, broadcast on presence change
    PresenceUpdate = 0x0010,
    /// Targeted notification (direct message or like)
    Notification = 0x0011,

    /// Send a direct message to another user
    SendMessage = 0x0020,
    /// Server acknowledgement of a persisted message
    MessageAck = 0x0021,
    /// Like another user's post
    LikePost = 0x0022,
    /// Toggle the follow edge towards a target user
    FollowToggle = 0x0023,
    /// Server response with the authoritative relation state
    FollowToggleReply = 0x0024,

    /// Error response
    Error = 0x00FF,
}

impl Opcode {
    /// Convert to the wire representation.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse from the wire representation. `None` for unknown codes.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Hello),
            0x0002 => Some(Self::HelloReply),
            0x0003 => Some(Self::Goodbye),
            0x0004 => Some(Self::Ping),
            0x0005 => Some(Self::Pong),
            0x0010 => Some(Self::PresenceUpdate),
            0x0011 => Some(Self::Notification),
            0x0020 => Some(Self::SendMessage),
            0x0021 => Some(Self::MessageAck),
            0x0022 => Some(Self::LikePost),
            0x0023 => Some(Self::FollowToggle),
            0x0024 => Some(Self::FollowToggleReply),
            0x00FF => Some(Self::Error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_all_opcodes() {
        let opcodes = [
            Opcode::Hello,
            Opcode::HelloReply,
            Opcode::Goodbye,
            Opcode::Ping,
            Opcode::Pong,
            Opcode::PresenceUpdate,
            Opcode::Notification,
            Opcode::SendMessage,
            Opcode::MessageAck,
            Opcode::LikePost,
            Opcode::FollowToggle,
            Opcode::FollowToggleReply,
            Opcode::Error,
        ];

        for opcode in opcodes {
            assert_eq!(Opcode::from_u16(opcode.to_u16()), Some(opcode));
        }
    }

    #[test]
    fn unknown_opcode_is_none() {
        assert_eq!(Opcode::from_u16(0xDEAD), None);
        assert_eq!(Opcode::from_u16(0x0000), None);
    }
}
