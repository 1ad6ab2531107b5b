//! Client trigger payload types.
//!
//! Request/response operations the client issues over the framed channel:
//! sending direct messages, liking posts, and toggling follow edges.
//! Responses are correlated via the header `request_id`.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// Send a direct message.
///
/// The server persists the message through the message store first, then
/// acks the sender and routes a `Message` notification to the recipient's
/// connected sessions (if any).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Identity the message is addressed to.
    pub recipient: UserId,

    /// Message body.
    pub body: String,
}

/// Acknowledgement that a message was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAck {
    /// Store-assigned id of the persisted message.
    pub message_id: u64,
}

/// Like another user's post.
///
/// Fire-and-forget: the server routes a `Like` notification to the post
/// author; there is no reply frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikePost {
    /// Author of the liked post (notification recipient).
    pub post_author: UserId,

    /// Identifier of the liked post.
    pub post_id: String,
}

/// Toggle the follow edge from the acting user to `target`.
///
/// The server flips the durable edge in the social-graph store and replies
/// with the authoritative resulting state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowToggle {
    /// Identity whose follow edge is toggled.
    pub target: UserId,
}

/// Authoritative relation state after a follow toggle.
///
/// Carries the actor's full follow list, not just the toggled edge: toggle
/// outcomes can be influenced by concurrent server-side conditions, so the
/// client replaces its cached list with this ground truth rather than
/// assuming its optimistic guess was kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowToggleReply {
    /// The target of the toggle.
    pub target: UserId,

    /// Whether the actor now follows the target.
    pub following: bool,

    /// The actor's complete follow list after the toggle.
    pub following_list: Vec<UserId>,
}
