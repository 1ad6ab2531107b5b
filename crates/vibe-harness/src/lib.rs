//! Deterministic simulation harness for Vibe protocol testing.
//!
//! Turmoil-based plumbing for running the server driver over simulated TCP
//! with virtual time and a seeded RNG, so presence, routing, and follow
//! reconciliation scenarios replay deterministically.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_env;
pub mod sim_server;
pub mod wire;

pub use sim_env::SimEnv;
pub use sim_server::{SimDriver, SimServer};
