//! Presence tracker deriving the online snapshot from registry transitions.
//!
//! Consumes [`PresenceTransition`] values produced by the connection registry
//! and yields at most one [`PresenceUpdate`] per membership change. Extra
//! sessions of an already-online identity and teardowns that leave other
//! devices connected produce nothing, so connected clients see exactly one
//! broadcast per actual change of the online set.

use std::collections::BTreeSet;

use vibe_proto::{UserId, payloads::presence::PresenceUpdate};

use crate::registry::PresenceTransition;

/// Derived online set with change-driven snapshot emission.
///
/// Snapshots are full, not incremental: every emitted update carries the
/// complete online set, so a client that missed earlier updates is corrected
/// by the next one. The backing `BTreeSet` keeps snapshots sorted, making
/// identical sets encode identically on the wire.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    online: BTreeSet<UserId>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a registry transition.
    ///
    /// Returns the snapshot to broadcast if the online set changed, `None`
    /// otherwise. A transition that states what the tracker already believes
    /// (a double `CameOnline`, say) is absorbed without a broadcast.
    pub fn apply(&mut self, transition: &PresenceTransition) -> Option<PresenceUpdate> {
        let changed = match transition {
            PresenceTransition::CameOnline(user) => self.online.insert(user.clone()),
            PresenceTransition::WentOffline(user) => self.online.remove(user),
            PresenceTransition::NoChange => false,
        };

        changed.then(|| self.snapshot())
    }

    /// Current full snapshot, sorted.
    pub fn snapshot(&self) -> PresenceUpdate {
        PresenceUpdate { online: self.online.iter().cloned().collect() }
    }

    /// Whether an identity is in the derived online set.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.contains(user)
    }

    /// Number of identities online.
    pub fn online_count(&self) -> usize {
        self.online.len()
    }
}
