//! Fuzz target for Payload::decode
//!
//! This fuzzer tests payload deserialization (CBOR decoding) with:
//! - Malformed CBOR data
//! - Type confusion attacks (wrong payload type for opcode)
//! - Oversized strings or collections
//! - Nested structures exceeding depth limits
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vibe_proto::{Opcode, Payload};

fuzz_target!(|data: &[u8]| {
    // Try every opcode so each payload type sees the same bytes
    let opcodes = [
        Opcode::Hello,
        Opcode::HelloReply,
        Opcode::Ping,
        Opcode::Pong,
        Opcode::Goodbye,
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
        // This should never panic, only return Err for invalid CBOR
        let _ = Payload::decode(opcode, data);
    }
});
