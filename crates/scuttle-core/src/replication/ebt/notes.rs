//! EBT notes and their wire encoding
//!
//! A batch of notes is a JSON object keyed by feed ref. Each value packs the
//! sequence and the receive flag into one integer:
//!
//! ```text
//!   -1                    do not replicate this feed
//!   (seq << 1) | 0        replicate, send me messages from seq on
//!   (seq << 1) | 1        replicate, but don't send me messages
//! ```
//!
//! Sequence 0 means no starting point, the whole feed is wanted.

use crate::error::{ReplicationError, ReplicationResult};
use crate::feed::Sequence;
use crate::identity::FeedRef;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

const MAX_ENCODED_SEQUENCE: u64 = (i64::MAX >> 1) as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    sequence: Option<Sequence>,
    replicate: bool,
    receive: bool,
}

impl Note {
    pub fn new(sequence: Option<Sequence>, replicate: bool, receive: bool) -> Self {
        Self {
            sequence,
            replicate,
            receive,
        }
    }

    /// Replicate and receive everything from `sequence` on.
    pub fn wanting(sequence: Option<Sequence>) -> Self {
        Self::new(sequence, true, true)
    }

    pub fn stop() -> Self {
        Self::new(None, false, false)
    }

    pub fn sequence(&self) -> Option<Sequence> {
        self.sequence
    }

    pub fn replicate(&self) -> bool {
        self.replicate
    }

    pub fn receive(&self) -> bool {
        self.receive
    }

    pub fn encode(&self) -> ReplicationResult<i64> {
        if !self.replicate {
            return Ok(-1);
        }
        let seq = self.sequence.map(Sequence::get).unwrap_or(0);
        if seq > MAX_ENCODED_SEQUENCE {
            return Err(ReplicationError::InvalidValue(format!(
                "sequence {} does not fit in a note",
                seq
            )));
        }
        Ok(((seq as i64) << 1) | if self.receive { 0 } else { 1 })
    }

    pub fn decode(value: i64) -> ReplicationResult<Self> {
        if value < 0 {
            return Ok(Self::stop());
        }
        let seq = (value >> 1) as u64;
        let sequence = if seq == 0 {
            None
        } else {
            Some(Sequence::new(seq)?)
        };
        Ok(Self::new(sequence, true, value & 1 == 0))
    }
}

/// A batch of notes, at most one per feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notes(BTreeMap<FeedRef, Note>);

impl Notes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a note, replacing any earlier note for the same feed.
    pub fn insert(&mut self, feed: FeedRef, note: Note) {
        self.0.insert(feed, note);
    }

    pub fn get(&self, feed: &FeedRef) -> Option<&Note> {
        self.0.get(feed)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FeedRef, &Note)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> ReplicationResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> ReplicationResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl FromIterator<(FeedRef, Note)> for Notes {
    fn from_iter<T: IntoIterator<Item = (FeedRef, Note)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for Notes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut encoded = BTreeMap::new();
        for (feed, note) in &self.0 {
            let value = note.encode().map_err(serde::ser::Error::custom)?;
            encoded.insert(feed.to_string(), value);
        }
        encoded.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Notes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = BTreeMap::<String, i64>::deserialize(deserializer)?;
        let mut notes = Notes::new();
        for (feed, value) in encoded {
            let feed: FeedRef = feed.parse().map_err(D::Error::custom)?;
            notes.insert(feed, Note::decode(value).map_err(D::Error::custom)?);
        }
        Ok(notes)
    }
}
