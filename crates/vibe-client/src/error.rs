//! Client error taxonomy.

use thiserror::Error;
use vibe_core::SessionError;
use vibe_proto::UserId;

/// Errors the client surfaces to the caller.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A follow toggle for this target is already awaiting confirmation.
    ///
    /// Callers should disable the control until the pending toggle resolves.
    #[error("follow toggle for {target} is already in flight")]
    ToggleInFlight {
        /// The identity with the pending toggle.
        target: UserId,
    },

    /// The selected chat partner no longer resolves to a known profile.
    ///
    /// Only the offending send fails; the session stays up.
    #[error("selected recipient {recipient} no longer resolves to a profile")]
    StaleSelection {
        /// The stale identity.
        recipient: UserId,
    },

    /// No conversation is selected.
    #[error("no chat selected")]
    NoChatSelected,

    /// The operation requires an established session.
    #[error("session is not established (state: {state})")]
    NotEstablished {
        /// Current session state, for diagnostics.
        state: String,
    },

    /// A received frame could not be interpreted.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// What went wrong.
        reason: String,
    },

    /// Session state machine failure (handshake, liveness).
    #[error(transparent)]
    Session(#[from] SessionError),
}
