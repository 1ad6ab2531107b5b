//! Connection registry for identity-to-session tracking.
//!
//! The registry maintains bidirectional mappings: identity → set of live
//! sessions (for targeted delivery) and session → identity (for cleanup on
//! disconnect). This enables O(1) lookups in both directions.
//!
//! An identity may hold several sessions at once (multiple devices). The
//! presence decision is made here, atomically with the membership change:
//! registering the first session for an identity yields `CameOnline`,
//! removing the last yields `WentOffline`, and everything in between is
//! `NoChange`.

use std::collections::{HashMap, HashSet};

use vibe_proto::UserId;

/// Presence effect of a registry mutation.
///
/// Returned together with the mutation so callers never have to diff the
/// online set themselves. Intermediate sessions of an already-online identity
/// produce `NoChange`, which is what keeps presence broadcasts down to one
/// per membership change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceTransition {
    /// First live session for this identity.
    CameOnline(UserId),
    /// Last live session for this identity went away.
    WentOffline(UserId),
    /// The identity's online status did not change.
    NoChange,
}

/// Registry for tracking live sessions per identity.
///
/// # Invariants
///
/// - An identity appears as a key iff it has at least one live session.
/// - Every session id maps to exactly one identity.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Session ID → identity
    sessions: HashMap<u64, UserId>,
    /// Identity → set of live session IDs (never empty)
    user_sessions: HashMap<UserId, HashSet<u64>>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for an identity.
    ///
    /// Returns `None` if the session id is already registered (a runtime
    /// bug, session ids are unique per connection). Otherwise returns the
    /// presence transition this registration caused.
    pub fn register_session(&mut self, session_id: u64, user: UserId) -> Option<PresenceTransition> {
        if self.sessions.contains_key(&session_id) {
            return None;
        }

        let devices = self.user_sessions.entry(user.clone()).or_default();
        let was_offline = devices.is_empty();
        devices.insert(session_id);
        self.sessions.insert(session_id, user.clone());

        if was_offline {
            Some(PresenceTransition::CameOnline(user))
        } else {
            Some(PresenceTransition::NoChange)
        }
    }

    /// Unregister a session.
    ///
    /// Idempotent: unknown session ids return `None` and mutate nothing, so
    /// racing disconnect paths (Goodbye plus transport close) are safe.
    /// Returns the identity and the presence transition otherwise.
    pub fn unregister_session(&mut self, session_id: u64) -> Option<(UserId, PresenceTransition)> {
        let user = self.sessions.remove(&session_id)?;

        let went_offline = match self.user_sessions.get_mut(&user) {
            Some(devices) => {
                devices.remove(&session_id);
                devices.is_empty()
            },
            None => {
                debug_assert!(false, "registered session without identity entry");
                false
            },
        };

        if went_offline {
            self.user_sessions.remove(&user);
            Some((user.clone(), PresenceTransition::WentOffline(user)))
        } else {
            Some((user, PresenceTransition::NoChange))
        }
    }

    /// Identity bound to a session. `None` if the session is not registered.
    pub fn user_for_session(&self, session_id: u64) -> Option<&UserId> {
        self.sessions.get(&session_id)
    }

    /// All live sessions for an identity.
    ///
    /// Used for targeted delivery: a notification goes to every device the
    /// recipient currently has connected.
    pub fn sessions_for_user(&self, user: &UserId) -> impl Iterator<Item = u64> + '_ {
        self.user_sessions.get(user).into_iter().flat_map(|s| s.iter().copied())
    }

    /// Whether an identity has at least one live session.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.user_sessions.contains_key(user)
    }

    /// All identities currently online.
    pub fn online_users(&self) -> impl Iterator<Item = &UserId> {
        self.user_sessions.keys()
    }

    /// All registered session ids (for broadcast).
    pub fn all_sessions(&self) -> impl Iterator<Item = u64> + '_ {
        self.sessions.keys().copied()
    }

    /// Check if a session is registered.
    pub fn has_session(&self, session_id: u64) -> bool {
        self.sessions.contains_key(&session_id)
    }

    /// Total number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of identities with at least one session.
    pub fn online_count(&self) -> usize {
        self.user_sessions.len()
    }

    /// Number of live sessions for an identity.
    pub fn device_count(&self, user: &UserId) -> usize {
        self.user_sessions.get(user).map_or(0, HashSet::len)
    }
}
