//! Targeted event routing with silent offline drop.
//!
//! Resolves a notification recipient to the set of sessions it should be
//! delivered to. Delivery is at most once per session and entirely advisory:
//! a recipient with no live sessions costs the sender nothing, the event is
//! dropped and only a debug log remains.

use vibe_proto::UserId;

use crate::registry::ConnectionRegistry;

/// Result of resolving a notification recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Recipient is online, deliver to these sessions.
    Delivered(Vec<u64>),
    /// Recipient has no live sessions, event is dropped.
    Dropped,
}

/// Stateless recipient resolver.
///
/// All state lives in the registry; the router only encodes the delivery
/// policy: every live session of the recipient, nobody else, and no queueing
/// for offline identities.
#[derive(Debug, Default)]
pub struct EventRouter;

impl EventRouter {
    /// Resolve the sessions a notification for `recipient` goes to.
    pub fn route(registry: &ConnectionRegistry, recipient: &UserId) -> RouteOutcome {
        let sessions: Vec<u64> = registry.sessions_for_user(recipient).collect();

        if sessions.is_empty() { RouteOutcome::Dropped } else { RouteOutcome::Delivered(sessions) }
    }
}
