//! Client
//!
//! Action-based client state machine for the Vibe protocol. Manages the
//! session lifecycle, the presence mirror, notifications, and optimistic
//! follow-toggle reconciliation.
//!
//! # Architecture
//!
//! The client follows the same Sans-IO and Action-Based patterns as
//! [`vibe_core`]. It receives events ([`ClientEvent`]), processes them
//! through pure state machine logic, and returns actions ([`ClientAction`])
//! for the caller to execute.
//!
//! # Components
//!
//! - [`Client`]: Top-level state machine
//! - [`FollowCoordinator`]: Optimistic follow-toggle projection
//! - [`ClientEvent`]: Events fed into the client
//! - [`ClientAction`]: Actions produced by the client
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::ConnectedClient`]: Client with QUIC transport
//! - [`transport::connect`]: Connect to a server

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;
mod follow;

#[cfg(feature = "transport")]
pub mod transport;

pub use client::Client;
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent};
pub use follow::{FollowCoordinator, PENDING_TIMEOUT};
pub use vibe_core::env::Environment;
