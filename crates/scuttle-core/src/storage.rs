//! Persistent storage using redb.
//!
//! This module provides ACID-compliant storage for:
//! - Feed messages (raw verified bytes, keyed by feed and sequence)
//! - Contacts derived from contact messages
//! - The ban list
//!
//! Appends go through [`FeedRepository::update_feed`], which runs inside a
//! single write transaction: redb allows one writer at a time, so "append
//! the next message to feed F" is a critical section.

use crate::error::ReplicationResult;
use crate::feed::{Feed, Message, Sequence, VerifiedRawMessage};
use crate::formats::RawMessageIdentifier;
use crate::identity::{FeedRef, MessageRef};
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

// Submodules
mod bans;
mod contacts;

use bans::BANS_TABLE;
use contacts::CONTACTS_TABLE;

/// Table for feed messages (key: "<feed>:<zero padded sequence>", value: StoredMessage)
const MESSAGES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("messages");

/// Access to feed messages.
pub trait FeedRepository: Send + Sync {
    /// The feed with its current head, `None` if no message is stored.
    fn get_feed(&self, feed: &FeedRef) -> ReplicationResult<Option<Feed>>;

    /// Run `update` against the feed and persist what it appended.
    ///
    /// Returns the newly persisted messages in order. Nothing is persisted
    /// if `update` fails.
    fn update_feed(
        &self,
        feed: &FeedRef,
        update: &mut dyn FnMut(&mut Feed) -> ReplicationResult<()>,
    ) -> ReplicationResult<Vec<Message>>;

    /// Messages starting at `from` (inclusive, the first message if `None`).
    fn get_messages(
        &self,
        feed: &FeedRef,
        from: Option<Sequence>,
        limit: Option<usize>,
    ) -> ReplicationResult<Vec<Message>>;

    /// Sequence of the last stored message.
    fn get_sequence(&self, feed: &FeedRef) -> ReplicationResult<Option<Sequence>>;
}

#[derive(Serialize, Deserialize)]
struct StoredMessage {
    id: [u8; 32],
    raw: Vec<u8>,
}

fn message_key(feed: &FeedRef, sequence: Sequence) -> String {
    format!("{}:{:020}", feed, sequence.get())
}

/// Key range covering every message of `feed`.
fn feed_range(feed: &FeedRef) -> (String, String) {
    (format!("{}:", feed), format!("{};", feed))
}

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
    identifier: RawMessageIdentifier,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will:
    /// - Create the database directory if it doesn't exist
    /// - Initialize the database file
    /// - Create all required tables
    pub fn new(path: impl AsRef<Path>, identifier: RawMessageIdentifier) -> ReplicationResult<Self> {
        let path = path.as_ref();

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;
        Self::init(db, identifier)
    }

    /// Storage kept entirely in memory.
    pub fn in_memory(identifier: RawMessageIdentifier) -> ReplicationResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db, identifier)
    }

    fn init(db: Database, identifier: RawMessageIdentifier) -> ReplicationResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(MESSAGES_TABLE)?;
            let _ = write_txn.open_table(CONTACTS_TABLE)?;
            let _ = write_txn.open_table(BANS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            identifier,
        })
    }

    pub fn identifier(&self) -> &RawMessageIdentifier {
        &self.identifier
    }

    fn decode_message(&self, value: &[u8]) -> ReplicationResult<Message> {
        let stored: StoredMessage = postcard::from_bytes(value)?;
        self.identifier
            .load_raw_message(&VerifiedRawMessage::new(stored.raw))?
            .with_id(MessageRef::from_bytes(stored.id))
    }

    fn last_message<T: ReadableTable<&'static str, &'static [u8]>>(
        &self,
        table: &T,
        feed: &FeedRef,
    ) -> ReplicationResult<Option<Message>> {
        let (start, end) = feed_range(feed);
        let mut range = table.range(start.as_str()..end.as_str())?;
        match range.next_back() {
            Some(entry) => {
                let (_, value) = entry?;
                Ok(Some(self.decode_message(value.value())?))
            }
            None => Ok(None),
        }
    }
}

impl FeedRepository for Storage {
    fn get_feed(&self, feed: &FeedRef) -> ReplicationResult<Option<Feed>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;
        Ok(self.last_message(&table, feed)?.map(Feed::with_head))
    }

    fn update_feed(
        &self,
        feed: &FeedRef,
        update: &mut dyn FnMut(&mut Feed) -> ReplicationResult<()>,
    ) -> ReplicationResult<Vec<Message>> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let persisted = {
            let mut messages = write_txn.open_table(MESSAGES_TABLE)?;
            let mut contacts_table = write_txn.open_table(CONTACTS_TABLE)?;

            let mut current = match self.last_message(&messages, feed)? {
                Some(head) => Feed::with_head(head),
                None => Feed::new(*feed),
            };
            update(&mut current)?;

            let mut persisted = Vec::new();
            for to_persist in current.pop_for_persisting() {
                let message = to_persist.message();
                let stored = postcard::to_allocvec(&StoredMessage {
                    id: *message.id().as_bytes(),
                    raw: message.raw().as_bytes().to_vec(),
                })?;
                let key = message_key(feed, message.sequence());
                messages.insert(key.as_str(), stored.as_slice())?;

                for contact in to_persist.contacts() {
                    contacts::apply(
                        &mut contacts_table,
                        contact.who(),
                        contact.content().contact(),
                        contact.content().actions(),
                    )?;
                }
                persisted.push(message.clone());
            }
            persisted
        };
        write_txn.commit()?;

        if let Some(last) = persisted.last() {
            debug!(
                feed = %feed,
                appended = persisted.len(),
                sequence = %last.sequence(),
                "Persisted messages"
            );
        }
        Ok(persisted)
    }

    fn get_messages(
        &self,
        feed: &FeedRef,
        from: Option<Sequence>,
        limit: Option<usize>,
    ) -> ReplicationResult<Vec<Message>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(MESSAGES_TABLE)?;

        let start = message_key(feed, from.unwrap_or(Sequence::first()));
        let (_, end) = feed_range(feed);

        let mut messages = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            if limit.is_some_and(|limit| messages.len() >= limit) {
                break;
            }
            let (_, value) = entry?;
            messages.push(self.decode_message(value.value())?);
        }
        Ok(messages)
    }

    fn get_sequence(&self, feed: &FeedRef) -> ReplicationResult<Option<Sequence>> {
        Ok(self.get_feed(feed)?.and_then(|f| f.sequence()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReplicationError;
    use crate::feed::UnsignedMessage;
    use crate::formats::{MessageHmac, Scuttlebutt};
    use crate::graph::ContactsStorage;
    use crate::identity::PrivateIdentity;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::tempdir;

    fn signed_chain(author: &PrivateIdentity, n: usize) -> Vec<Message> {
        let format = Scuttlebutt::default();
        let mut messages: Vec<Message> = Vec::new();
        for i in 0..n {
            let unsigned =
                UnsignedMessage::after(messages.last(), Utc::now(), json!({"type": "post", "n": i}))
                    .unwrap();
            messages.push(format.sign(&unsigned, author).unwrap());
        }
        messages
    }

    fn storage() -> Storage {
        Storage::in_memory(RawMessageIdentifier::scuttlebutt(MessageHmac::default())).unwrap()
    }

    fn append_all(storage: &Storage, messages: &[Message]) -> ReplicationResult<Vec<Message>> {
        let feed = *messages[0].feed();
        storage.update_feed(&feed, &mut |f| {
            for m in messages {
                f.append(m.clone())?;
            }
            Ok(())
        })
    }

    #[test]
    fn test_storage_creation() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("scuttle.redb");
        let storage = Storage::new(&db_path, RawMessageIdentifier::scuttlebutt(MessageHmac::default()));
        assert!(storage.is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_empty_feed() {
        let storage = storage();
        let feed = PrivateIdentity::generate().unwrap().identity().main_feed();

        assert!(storage.get_feed(&feed).unwrap().is_none());
        assert!(storage.get_sequence(&feed).unwrap().is_none());
        assert!(storage.get_messages(&feed, None, None).unwrap().is_empty());
    }

    #[test]
    fn test_append_and_read_back() {
        let storage = storage();
        let author = PrivateIdentity::generate().unwrap();
        let messages = signed_chain(&author, 5);
        let feed = author.identity().main_feed();

        let persisted = append_all(&storage, &messages).unwrap();
        assert_eq!(persisted, messages);

        assert_eq!(storage.get_sequence(&feed).unwrap().map(Sequence::get), Some(5));
        assert_eq!(storage.get_feed(&feed).unwrap().unwrap().head(), Some(&messages[4]));
        assert_eq!(storage.get_messages(&feed, None, None).unwrap(), messages);

        let from_three = storage
            .get_messages(&feed, Some(Sequence::new(3).unwrap()), Some(2))
            .unwrap();
        assert_eq!(from_three, messages[2..4].to_vec());
    }

    #[test]
    fn test_failed_update_persists_nothing() {
        let storage = storage();
        let author = PrivateIdentity::generate().unwrap();
        let messages = signed_chain(&author, 3);
        let feed = author.identity().main_feed();

        // 1 and 3: the gap fails the whole update
        let result = storage.update_feed(&feed, &mut |f| {
            f.append(messages[0].clone())?;
            f.append(messages[2].clone())
        });
        assert!(matches!(result, Err(ReplicationError::ChainViolation(_))));
        assert!(storage.get_sequence(&feed).unwrap().is_none());
    }

    #[test]
    fn test_update_continues_from_stored_head() {
        let storage = storage();
        let author = PrivateIdentity::generate().unwrap();
        let messages = signed_chain(&author, 4);
        let feed = author.identity().main_feed();

        append_all(&storage, &messages[..2]).unwrap();
        assert!(append_all(&storage, &messages[3..]).is_err());
        append_all(&storage, &messages[2..]).unwrap();

        assert_eq!(storage.get_sequence(&feed).unwrap().map(Sequence::get), Some(4));
    }

    #[test]
    fn test_feeds_do_not_mix() {
        let storage = storage();
        let alice = PrivateIdentity::generate().unwrap();
        let bob = PrivateIdentity::generate().unwrap();

        append_all(&storage, &signed_chain(&alice, 3)).unwrap();
        append_all(&storage, &signed_chain(&bob, 2)).unwrap();

        let alice_feed = alice.identity().main_feed();
        let bob_feed = bob.identity().main_feed();
        assert_eq!(storage.get_messages(&alice_feed, None, None).unwrap().len(), 3);
        assert_eq!(storage.get_messages(&bob_feed, None, None).unwrap().len(), 2);
    }

    #[test]
    fn test_contact_messages_update_contacts() {
        let storage = storage();
        let author = PrivateIdentity::generate().unwrap();
        let target = PrivateIdentity::generate().unwrap().identity();

        let unsigned = UnsignedMessage::after(
            None,
            Utc::now(),
            json!({"type": "contact", "contact": target.to_string(), "following": true}),
        )
        .unwrap();
        let message = Scuttlebutt::default().sign(&unsigned, &author).unwrap();
        append_all(&storage, &[message]).unwrap();

        let contacts = storage.get_contacts(&author.identity()).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].target(), &target);
        assert!(contacts[0].following());
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("scuttle.redb");
        let author = PrivateIdentity::generate().unwrap();
        let messages = signed_chain(&author, 2);
        let identifier = RawMessageIdentifier::scuttlebutt(MessageHmac::default());

        {
            let storage = Storage::new(&db_path, identifier.clone()).unwrap();
            append_all(&storage, &messages).unwrap();
        }

        let storage = Storage::new(&db_path, identifier).unwrap();
        let feed = author.identity().main_feed();
        assert_eq!(storage.get_messages(&feed, None, None).unwrap(), messages);
    }
}
