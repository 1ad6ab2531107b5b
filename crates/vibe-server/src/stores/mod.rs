//! Durable-state collaborators for the social graph and message history.
//!
//! Trait-based abstraction so the driver never touches a concrete backend.
//! The traits are synchronous (no async) to maintain a clean synchronous API
//! design; the runtime wraps calls where latency matters.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticStore;
pub use error::StoreError;
pub use memory::{MemoryMessageStore, MemorySocialGraph};
use serde::{Deserialize, Serialize};
use vibe_proto::UserId;

pub use self::redb::RedbStore;

/// A persisted direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Store-assigned id, strictly increasing per store.
    pub message_id: u64,
    /// Who sent it.
    pub sender: UserId,
    /// Who it is addressed to.
    pub recipient: UserId,
    /// Message body.
    pub body: String,
    /// Wall-clock send time, milliseconds since the Unix epoch. Stamped by
    /// the store at append time.
    pub sent_at_ms: u64,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// A clock set before the epoch reads as zero rather than failing the
/// append.
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

/// Durable follow-edge state.
///
/// Must be Clone (shared with the driver and the runtime), Send + Sync
/// (thread-safe), and synchronous. Implementations typically share internal
/// state via Arc, so clones access the same underlying store.
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned (a thread panicked while holding a lock). Acceptable for
/// test/simulation code, but production implementations should handle
/// poisoned mutexes gracefully.
pub trait SocialGraphStore: Clone + Send + Sync + 'static {
    /// Flip the follow edge from `actor` to `target`.
    ///
    /// Returns the resulting state: `true` if `actor` now follows `target`.
    ///
    /// # Errors
    ///
    /// - `StoreError::SelfFollow` if `actor == target`
    /// - `StoreError::Io` on backend failure
    fn toggle_follow(&self, actor: &UserId, target: &UserId) -> Result<bool, StoreError>;

    /// Whether `actor` currently follows `target`.
    fn is_following(&self, actor: &UserId, target: &UserId) -> Result<bool, StoreError>;

    /// All identities `user` follows, sorted.
    ///
    /// Sorted so two reads of the same graph state compare equal, this list
    /// is the ground truth clients replace their cached state with.
    fn following(&self, user: &UserId) -> Result<Vec<UserId>, StoreError>;
}

/// Durable message history.
///
/// Same contract shape as [`SocialGraphStore`]: Clone + Send + Sync,
/// synchronous, shared via Arc.
pub trait MessageStore: Clone + Send + Sync + 'static {
    /// Persist a message and return its store-assigned id.
    ///
    /// # Invariants
    ///
    /// - Post: ids are strictly increasing across appends
    fn append(&self, sender: &UserId, recipient: &UserId, body: &str) -> Result<u64, StoreError>;

    /// Load the conversation between two identities, oldest first.
    ///
    /// Direction-agnostic: returns messages sent either way.
    fn conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<StoredMessage>, StoreError>;

    /// Id of the most recently appended message. `None` if the store is empty.
    fn latest_message_id(&self) -> Result<Option<u64>, StoreError>;
}
