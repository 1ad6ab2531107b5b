//! Client events and actions.

use vibe_proto::{Frame, UserId, payloads::presence::Notification};

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Receiving frames from the network
/// - Driving time forward via ticks
/// - Forwarding application intents (send message, toggle follow, etc.)
///
/// Generic over `I` (Instant type) to support both production
/// (std::time::Instant) and simulation (tokio::time::Instant) environments.
#[derive(Debug, Clone)]
pub enum ClientEvent<I = std::time::Instant> {
    /// Start the handshake with the given auth token.
    Connect {
        /// Opaque token the server resolves to an identity.
        auth_token: String,
    },

    /// Frame received from server.
    FrameReceived(Frame),

    /// Time tick for heartbeats and timeout processing.
    ///
    /// The caller should send ticks periodically so the client can detect
    /// idle timeouts and expire stale pending follow toggles.
    Tick {
        /// Current time from the environment.
        now: I,
    },

    /// The application loaded or refreshed the set of known profiles.
    ///
    /// The client validates chat selections against this set; a recipient
    /// that disappears from it makes the selection stale.
    ProfilesLoaded {
        /// All currently known identities.
        users: Vec<UserId>,
    },

    /// Application selected a conversation partner.
    SelectChat {
        /// The identity to chat with.
        user: UserId,
    },

    /// Application wants to send a message to the selected chat.
    SendMessage {
        /// Message body.
        body: String,
    },

    /// Application liked a post.
    LikePost {
        /// Author of the liked post.
        post_author: UserId,
        /// Post identifier.
        post_id: String,
    },

    /// Application toggled the follow state for an identity.
    ToggleFollow {
        /// The identity whose follow edge to flip.
        target: UserId,
    },

    /// Application wants to disconnect cleanly.
    Disconnect {
        /// Reason sent in the Goodbye frame.
        reason: String,
    },
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone)]
pub enum ClientAction {
    /// Send a frame to the server.
    Send(Frame),

    /// The handshake completed and the session is live.
    Established {
        /// Session id assigned by the server.
        session_id: u64,
        /// Our authenticated identity.
        user: UserId,
    },

    /// The online set changed; update presence indicators.
    PresenceChanged {
        /// Full sorted online set.
        online: Vec<UserId>,
    },

    /// A notification arrived for us.
    NotificationReceived(Notification),

    /// The server acknowledged a sent message.
    MessageAcked {
        /// Durable message id assigned by the server.
        message_id: u64,
    },

    /// A follow toggle was confirmed by the server.
    ///
    /// `following_list` is the authoritative list read back from the store,
    /// replacing whatever the optimistic projection guessed.
    FollowConfirmed {
        /// The toggled identity.
        target: UserId,
        /// Resulting relation.
        following: bool,
        /// Our full follow list, ground truth.
        following_list: Vec<UserId>,
    },

    /// A follow toggle failed and was rolled back.
    ///
    /// Surface this to the user; the control shows `reverted_to` again.
    FollowToggleFailed {
        /// The toggled identity.
        target: UserId,
        /// The confirmed value the projection reverted to.
        reverted_to: bool,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The connection is closed; no further frames will be processed.
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// Log message for debugging.
    Log {
        /// Log message.
        message: String,
    },
}
