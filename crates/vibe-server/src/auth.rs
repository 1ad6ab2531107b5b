//! Handshake authentication collaborator.
//!
//! Resolves the opaque token a client presents in its Hello frame to an
//! identity. The driver refuses the connection (error frame, then close)
//! when resolution fails; no unauthenticated session ever reaches the
//! registry.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;
use vibe_proto::UserId;

/// Authentication failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The token did not resolve to an identity.
    #[error("auth token did not resolve to an identity")]
    Unauthenticated,
}

/// Token-to-identity resolution.
///
/// Synchronous by design: the driver is a pure state machine and token
/// lookup happens inline during handshake handling. Implementations share
/// state via Arc, so clones resolve against the same token set.
pub trait Authenticator: Clone + Send + Sync + 'static {
    /// Resolve a token to an identity.
    ///
    /// # Errors
    ///
    /// - `AuthError::Unauthenticated` if the token is unknown
    fn authenticate(&self, token: &str) -> Result<UserId, AuthError>;

    /// Whether an identity exists at all.
    ///
    /// Used to reject messages addressed to identities that no longer
    /// resolve to a profile, independent of whether they are online.
    fn known_user(&self, user: &UserId) -> bool;
}

/// In-memory token map.
///
/// Tokens are provisioned out of band (CLI flags, test setup). In permissive
/// mode every unknown token resolves to an identity equal to the token
/// itself, which is handy for local development and simulation but must
/// never be enabled in production.
#[derive(Clone, Default)]
pub struct TokenAuthenticator {
    tokens: Arc<Mutex<HashMap<String, UserId>>>,
    permissive: bool,
}

impl TokenAuthenticator {
    /// Create a strict authenticator with no provisioned tokens.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a permissive authenticator for development and tests.
    ///
    /// Unknown tokens resolve to `UserId(token)`.
    #[must_use]
    pub fn permissive() -> Self {
        Self { tokens: Arc::new(Mutex::new(HashMap::new())), permissive: true }
    }

    /// Provision a token for an identity.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (a thread panicked while
    /// holding the lock).
    #[allow(clippy::expect_used)]
    pub fn insert(&self, token: impl Into<String>, user: UserId) {
        self.tokens.lock().expect("Mutex poisoned").insert(token.into(), user);
    }

    /// Number of provisioned tokens.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn token_count(&self) -> usize {
        self.tokens.lock().expect("Mutex poisoned").len()
    }
}

impl Authenticator for TokenAuthenticator {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        if let Some(user) = self.tokens.lock().expect("Mutex poisoned").get(token) {
            return Ok(user.clone());
        }

        if self.permissive {
            return Ok(UserId::new(token));
        }

        Err(AuthError::Unauthenticated)
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn known_user(&self, user: &UserId) -> bool {
        if self.permissive {
            return true;
        }

        self.tokens.lock().expect("Mutex poisoned").values().any(|known| known == user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_rejects_unknown_token() {
        let auth = TokenAuthenticator::new();
        assert_eq!(auth.authenticate("nobody"), Err(AuthError::Unauthenticated));
    }

    #[test]
    fn provisioned_token_resolves() {
        let auth = TokenAuthenticator::new();
        auth.insert("tok-alice", UserId::new("alice"));

        assert_eq!(auth.authenticate("tok-alice"), Ok(UserId::new("alice")));
        assert_eq!(auth.authenticate("tok-bob"), Err(AuthError::Unauthenticated));
    }

    #[test]
    fn permissive_echoes_token_as_identity() {
        let auth = TokenAuthenticator::permissive();
        assert_eq!(auth.authenticate("dev-user"), Ok(UserId::new("dev-user")));

        // Provisioned tokens still win over the fallback
        auth.insert("tok-alice", UserId::new("alice"));
        assert_eq!(auth.authenticate("tok-alice"), Ok(UserId::new("alice")));
    }

    #[test]
    fn known_user_tracks_provisioned_identities() {
        let auth = TokenAuthenticator::new();
        auth.insert("tok-alice", UserId::new("alice"));

        assert!(auth.known_user(&UserId::new("alice")));
        assert!(!auth.known_user(&UserId::new("ghost")));
        assert!(TokenAuthenticator::permissive().known_user(&UserId::new("ghost")));
    }

    #[test]
    fn clones_share_token_state() {
        let auth = TokenAuthenticator::new();
        let clone = auth.clone();

        auth.insert("tok-alice", UserId::new("alice"));
        assert_eq!(clone.authenticate("tok-alice"), Ok(UserId::new("alice")));
    }
}
