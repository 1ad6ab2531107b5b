//! Core session logic shared by client and server.
//!
//! Contains the pure session state machine (handshake, heartbeats, timeouts)
//! and the [`Environment`] abstraction that decouples protocol logic from
//! system time and randomness for deterministic testing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod session;

pub use env::Environment;
pub use error::SessionError;
pub use session::{Session, SessionAction, SessionConfig, SessionState};
