//! Fuzz target for the server driver event loop
//!
//! Feeds arbitrary event sequences (connects, raw frames, disconnects,
//! ticks) into the driver to find:
//! - Panics on unexpected event orderings
//! - Registry/presence divergence after hostile frame sequences
//! - State corruption from frames on unknown or closed sessions
//!
//! The driver may return errors freely; it must never panic, and the online
//! set must always be a subset of the live sessions.

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use vibe_core::env::Environment;
use vibe_proto::{Frame, FrameHeader, Opcode};
use vibe_server::{
    DriverConfig, ServerDriver, ServerEvent,
    auth::TokenAuthenticator,
    stores::{MemoryMessageStore, MemorySocialGraph},
};

#[derive(Clone)]
struct FuzzEnv;

impl Environment for FuzzEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = i as u8;
        }
    }
}

#[derive(Debug, Arbitrary)]
enum FuzzOp {
    Accept { session_id: u8 },
    Frame { session_id: u8, opcode: u16, payload: Vec<u8> },
    Close { session_id: u8 },
    Tick,
}

fuzz_target!(|ops: Vec<FuzzOp>| {
    let mut driver = ServerDriver::new(
        FuzzEnv,
        TokenAuthenticator::permissive(),
        MemorySocialGraph::new(),
        MemoryMessageStore::new(),
        DriverConfig::default(),
    );

    for op in ops {
        let event = match op {
            // Session id 0 is reserved, shift the fuzzed byte up by one.
            FuzzOp::Accept { session_id } => {
                ServerEvent::ConnectionAccepted { session_id: u64::from(session_id) + 1 }
            },
            FuzzOp::Frame { session_id, opcode, payload } => {
                let raw = opcode % 0x0100;
                let header = match Opcode::from_u16(raw) {
                    Some(op) => FrameHeader::new(op),
                    None => FrameHeader::new(Opcode::Ping),
                };
                ServerEvent::FrameReceived {
                    session_id: u64::from(session_id) + 1,
                    frame: Frame::new(header, Bytes::from(payload)),
                }
            },
            FuzzOp::Close { session_id } => ServerEvent::ConnectionClosed {
                session_id: u64::from(session_id) + 1,
                reason: "fuzz".to_string(),
            },
            FuzzOp::Tick => ServerEvent::Tick,
        };

        // Errors are fine, panics are not
        let _ = driver.process_event(event);

        // Online identities can never outnumber registered sessions
        assert!(driver.online_snapshot().len() <= driver.registered_sessions().len());
    }
});
