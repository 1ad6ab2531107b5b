//! Redb-backed durable store implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Follow edges and message history survive server restarts. One
//! [`RedbStore`] implements both store traits so a single database file
//! holds all durable state.

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition};
use vibe_proto::UserId;

use super::{MessageStore, SocialGraphStore, StoreError, StoredMessage, unix_millis};

/// Table: follow edges
/// Key: length-prefixed follower + target bytes (see `encode_edge_key`)
/// Value: empty (key presence is the edge)
const FOLLOWS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("follows");

/// Table: messages
/// Key: message id (strictly increasing)
/// Value: CBOR-encoded `StoredMessage`
const MESSAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("messages");

/// Durable store backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates the FOLLOWS and MESSAGES tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| StoreError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(FOLLOWS).map_err(|e| StoreError::Io(e.to_string()))?;
            let _ = txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl SocialGraphStore for RedbStore {
    fn toggle_follow(&self, actor: &UserId, target: &UserId) -> Result<bool, StoreError> {
        if actor == target {
            return Err(StoreError::SelfFollow(actor.to_string()));
        }

        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;

        let following = {
            let mut table = txn.open_table(FOLLOWS).map_err(|e| StoreError::Io(e.to_string()))?;
            let key = encode_edge_key(actor, target);

            let exists = table
                .get(key.as_slice())
                .map_err(|e| StoreError::Io(e.to_string()))?
                .is_some();

            if exists {
                table.remove(key.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
                false
            } else {
                table
                    .insert(key.as_slice(), [].as_slice())
                    .map_err(|e| StoreError::Io(e.to_string()))?;
                true
            }
        };

        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(following)
    }

    fn is_following(&self, actor: &UserId, target: &UserId) -> Result<bool, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(FOLLOWS).map_err(|e| StoreError::Io(e.to_string()))?;

        let key = encode_edge_key(actor, target);
        Ok(table.get(key.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?.is_some())
    }

    fn following(&self, user: &UserId) -> Result<Vec<UserId>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(FOLLOWS).map_err(|e| StoreError::Io(e.to_string()))?;

        let prefix = encode_edge_prefix(user);
        let results = table
            .range(prefix.as_slice()..)
            .map_err(|e| StoreError::Io(e.to_string()))?;

        // Keys sharing the follower prefix are contiguous; byte order of the
        // target suffix matches lexicographic UserId order, so the result is
        // already sorted.
        let mut following = Vec::new();
        for result in results {
            let (key, _) = result.map_err(|e| StoreError::Io(e.to_string()))?;
            let key = key.value();

            if !key.starts_with(&prefix) {
                break;
            }

            let target = std::str::from_utf8(&key[prefix.len()..])
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            following.push(UserId::new(target));
        }

        Ok(following)
    }
}

impl MessageStore for RedbStore {
    fn append(&self, sender: &UserId, recipient: &UserId, body: &str) -> Result<u64, StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;

        let message_id = {
            let mut table = txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;

            let message_id = table
                .last()
                .map_err(|e| StoreError::Io(e.to_string()))?
                .map_or(1, |(key, _)| key.value() + 1);

            let message = StoredMessage {
                message_id,
                sender: sender.clone(),
                recipient: recipient.clone(),
                body: body.to_string(),
                sent_at_ms: unix_millis(),
            };

            let mut bytes = Vec::new();
            ciborium::into_writer(&message, &mut bytes)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            table
                .insert(message_id, bytes.as_slice())
                .map_err(|e| StoreError::Io(e.to_string()))?;

            message_id
        };

        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(message_id)
    }

    fn conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<StoredMessage>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;

        // Full scan in id order. Message volume per store is modest; a
        // per-pair index can be added when that stops being true.
        let mut thread = Vec::new();
        for result in table.iter().map_err(|e| StoreError::Io(e.to_string()))? {
            let (_, value) = result.map_err(|e| StoreError::Io(e.to_string()))?;

            let message: StoredMessage = ciborium::from_reader(value.value())
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

            let matches = (&message.sender == a && &message.recipient == b)
                || (&message.sender == b && &message.recipient == a);
            if matches {
                thread.push(message);
            }
        }

        Ok(thread)
    }

    fn latest_message_id(&self) -> Result<Option<u64>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(table.last().map_err(|e| StoreError::Io(e.to_string()))?.map(|(key, _)| key.value()))
    }
}

/// Edge key: `[follower_len: u32 BE][follower][target]`.
///
/// The length prefix keeps follower boundaries unambiguous (identities are
/// arbitrary strings) while keeping all edges of one follower contiguous.
fn encode_edge_key(actor: &UserId, target: &UserId) -> Vec<u8> {
    let mut key = encode_edge_prefix(actor);
    key.extend_from_slice(target.as_str().as_bytes());
    key
}

fn encode_edge_prefix(actor: &UserId) -> Vec<u8> {
    let actor_bytes = actor.as_str().as_bytes();
    let mut key = Vec::with_capacity(4 + actor_bytes.len());
    key.extend_from_slice(&(actor_bytes.len() as u32).to_be_bytes());
    key.extend_from_slice(actor_bytes);
    key
}
