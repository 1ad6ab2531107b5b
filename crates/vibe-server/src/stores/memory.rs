#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
};

use vibe_proto::UserId;

use super::{MessageStore, SocialGraphStore, StoreError, StoredMessage, unix_millis};

/// In-memory social graph for testing and simulation.
///
/// Follow edges live in a `BTreeSet` per follower so `following()` comes out
/// sorted without an extra pass. All state is wrapped in Arc<Mutex<>> to
/// allow Clone and concurrent access. Uses `lock().expect()` which will
/// panic if the mutex is poisoned, acceptable for test code.
#[derive(Clone, Default)]
pub struct MemorySocialGraph {
    edges: Arc<Mutex<HashMap<UserId, BTreeSet<UserId>>>>,
}

impl MemorySocialGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a follow edge directly (test setup).
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn seed_follow(&self, actor: &UserId, target: &UserId) {
        self.edges
            .lock()
            .expect("Mutex poisoned")
            .entry(actor.clone())
            .or_default()
            .insert(target.clone());
    }
}

impl SocialGraphStore for MemorySocialGraph {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn toggle_follow(&self, actor: &UserId, target: &UserId) -> Result<bool, StoreError> {
        if actor == target {
            return Err(StoreError::SelfFollow(actor.to_string()));
        }

        let mut edges = self.edges.lock().expect("Mutex poisoned");
        let followed = edges.entry(actor.clone()).or_default();

        if followed.remove(target) {
            Ok(false)
        } else {
            followed.insert(target.clone());
            Ok(true)
        }
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn is_following(&self, actor: &UserId, target: &UserId) -> Result<bool, StoreError> {
        let edges = self.edges.lock().expect("Mutex poisoned");
        Ok(edges.get(actor).is_some_and(|followed| followed.contains(target)))
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn following(&self, user: &UserId) -> Result<Vec<UserId>, StoreError> {
        let edges = self.edges.lock().expect("Mutex poisoned");
        Ok(edges.get(user).map(|followed| followed.iter().cloned().collect()).unwrap_or_default())
    }
}

/// In-memory message history for testing and simulation.
///
/// Messages are stored in append order; ids are the vector index plus one so
/// id zero never appears (zero reads as "unset" in acks).
#[derive(Clone, Default)]
pub struct MemoryMessageStore {
    messages: Arc<Mutex<Vec<StoredMessage>>>,
}

impl MemoryMessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn message_count(&self) -> usize {
        self.messages.lock().expect("Mutex poisoned").len()
    }
}

impl MessageStore for MemoryMessageStore {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn append(&self, sender: &UserId, recipient: &UserId, body: &str) -> Result<u64, StoreError> {
        let mut messages = self.messages.lock().expect("Mutex poisoned");

        let message_id = messages.len() as u64 + 1;
        messages.push(StoredMessage {
            message_id,
            sender: sender.clone(),
            recipient: recipient.clone(),
            body: body.to_string(),
            sent_at_ms: unix_millis(),
        });

        Ok(message_id)
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<StoredMessage>, StoreError> {
        let messages = self.messages.lock().expect("Mutex poisoned");

        Ok(messages
            .iter()
            .filter(|m| {
                (&m.sender == a && &m.recipient == b) || (&m.sender == b && &m.recipient == a)
            })
            .cloned()
            .collect())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. This is acceptable for test
    /// code.
    #[allow(clippy::expect_used)]
    fn latest_message_id(&self) -> Result<Option<u64>, StoreError> {
        let messages = self.messages.lock().expect("Mutex poisoned");
        Ok(messages.last().map(|m| m.message_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::new(s)
    }

    #[test]
    fn toggle_creates_then_removes_edge() {
        let graph = MemorySocialGraph::new();

        assert!(graph.toggle_follow(&uid("alice"), &uid("bob")).unwrap());
        assert!(graph.is_following(&uid("alice"), &uid("bob")).unwrap());

        assert!(!graph.toggle_follow(&uid("alice"), &uid("bob")).unwrap());
        assert!(!graph.is_following(&uid("alice"), &uid("bob")).unwrap());
    }

    #[test]
    fn follow_is_directional() {
        let graph = MemorySocialGraph::new();

        graph.toggle_follow(&uid("alice"), &uid("bob")).unwrap();

        assert!(graph.is_following(&uid("alice"), &uid("bob")).unwrap());
        assert!(!graph.is_following(&uid("bob"), &uid("alice")).unwrap());
    }

    #[test]
    fn self_follow_rejected() {
        let graph = MemorySocialGraph::new();

        let result = graph.toggle_follow(&uid("alice"), &uid("alice"));
        assert!(matches!(result, Err(StoreError::SelfFollow(_))));
        assert!(graph.following(&uid("alice")).unwrap().is_empty());
    }

    #[test]
    fn following_list_is_sorted() {
        let graph = MemorySocialGraph::new();

        for name in ["zoe", "bob", "mallory"] {
            graph.toggle_follow(&uid("alice"), &uid(name)).unwrap();
        }

        let following = graph.following(&uid("alice")).unwrap();
        assert_eq!(following, vec![uid("bob"), uid("mallory"), uid("zoe")]);
    }

    #[test]
    fn append_assigns_increasing_ids() {
        let store = MemoryMessageStore::new();

        let id1 = store.append(&uid("alice"), &uid("bob"), "hi").unwrap();
        let id2 = store.append(&uid("bob"), &uid("alice"), "hey").unwrap();

        assert!(id2 > id1);
        assert_eq!(store.latest_message_id().unwrap(), Some(id2));
    }

    #[test]
    fn conversation_is_direction_agnostic() {
        let store = MemoryMessageStore::new();

        store.append(&uid("alice"), &uid("bob"), "hi").unwrap();
        store.append(&uid("bob"), &uid("alice"), "hey").unwrap();
        store.append(&uid("alice"), &uid("carol"), "other thread").unwrap();

        let thread = store.conversation(&uid("alice"), &uid("bob")).unwrap();
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[0].body, "hi");
        assert_eq!(thread[1].body, "hey");
    }

    #[test]
    fn appended_messages_carry_send_time() {
        let store = MemoryMessageStore::new();

        store.append(&uid("alice"), &uid("bob"), "hi").unwrap();
        store.append(&uid("bob"), &uid("alice"), "hey").unwrap();

        let thread = store.conversation(&uid("alice"), &uid("bob")).unwrap();
        assert!(thread[0].sent_at_ms > 0);
        assert!(thread[1].sent_at_ms >= thread[0].sent_at_ms);
    }

    #[test]
    fn empty_store_has_no_latest_id() {
        let store = MemoryMessageStore::new();
        assert_eq!(store.latest_message_id().unwrap(), None);
    }
}
