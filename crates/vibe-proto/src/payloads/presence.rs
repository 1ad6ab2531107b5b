//! Presence and notification payload types.
//!
//! Server-push events: the full online-identity snapshot broadcast on any
//! presence change, and targeted notifications for likes and direct
//! messages. Both are advisory - no delivery guarantee, no replay.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// Full online-identity snapshot.
///
/// Broadcast to every connected session whenever the online set changes.
/// The list is sorted so identical sets always encode identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// All identities currently online.
    pub online: Vec<UserId>,
}

/// Kind of a targeted notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// A direct message arrived.
    Message,
    /// Someone liked one of the recipient's posts.
    Like,
}

/// Targeted notification event.
///
/// Delivered at most once, to the recipient's currently-connected sessions
/// only. A notification generated while the recipient has no sessions is
/// dropped silently; notifications are advisory, not transactional state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// What happened.
    pub kind: NotificationKind,

    /// Identity the event is addressed to.
    pub recipient: UserId,

    /// Identity that caused the event.
    pub sender: UserId,

    /// Display payload: the message body for `Message`, the post id for
    /// `Like`.
    pub body: String,
}
