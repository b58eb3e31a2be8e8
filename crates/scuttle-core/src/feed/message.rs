//! Messages of a hash-chained feed
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │  seq: 1      │◀───│  seq: 2      │◀───│  seq: 3      │
//! │  prev: none  │    │  prev: %m1   │    │  prev: %m2   │
//! │  id:  %m1    │    │  id:  %m2    │    │  id:  %m3    │
//! └──────────────┘    └──────────────┘    └──────────────┘
//! ```
//!
//! A message is only constructible when its sequence and `previous`
//! agree: the first message has no previous, every later one points at
//! a non-zero message id.

use crate::error::{ReplicationError, ReplicationResult};
use crate::feed::content::KnownContent;
use crate::identity::{FeedRef, IdentityRef, MessageRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a message in its feed, starting at 1.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sequence(u64);

impl Sequence {
    pub fn new(n: u64) -> ReplicationResult<Self> {
        if n == 0 {
            return Err(ReplicationError::InvalidValue(
                "sequence must be a positive number".to_string(),
            ));
        }
        Ok(Self(n))
    }

    pub const fn first() -> Self {
        Self(1)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_first(self) -> bool {
        self.0 == 1
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Previous position, `None` for the first message.
    pub fn previous(self) -> Option<Self> {
        (self.0 > 1).then(|| Self(self.0 - 1))
    }

    pub fn comes_directly_before(self, other: Sequence) -> bool {
        self.0 + 1 == other.0
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sequence({})", self.0)
    }
}

/// Bytes received from a peer that have not been verified yet.
#[derive(Clone, PartialEq, Eq)]
pub struct RawMessage(Vec<u8>);

impl RawMessage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawMessage({} bytes)", self.0.len())
    }
}

/// Bytes which were verified when the message was first received.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedRawMessage(Vec<u8>);

impl VerifiedRawMessage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Forward the verified bytes to a peer, which has to verify them itself.
    pub fn to_raw(&self) -> RawMessage {
        RawMessage(self.0.clone())
    }
}

impl fmt::Debug for VerifiedRawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifiedRawMessage({} bytes)", self.0.len())
    }
}

/// Message content: opaque JSON, recognised when it is a known type.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    value: serde_json::Value,
}

impl Content {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    /// The `type` field, if the content is an object carrying one.
    pub fn content_type(&self) -> Option<&str> {
        self.value.get("type").and_then(|t| t.as_str())
    }

    /// Parsed content when the engine understands its type.
    pub fn known(&self) -> Option<KnownContent> {
        KnownContent::parse(&self.value)
    }
}

fn check_chain_fields(
    previous: Option<&MessageRef>,
    sequence: Sequence,
) -> ReplicationResult<()> {
    match previous {
        None if !sequence.is_first() => Err(ReplicationError::InvalidMessage(format!(
            "message with sequence {} must have a previous message",
            sequence
        ))),
        Some(_) if sequence.is_first() => Err(ReplicationError::InvalidMessage(
            "first message can not have a previous message".to_string(),
        )),
        Some(previous) if previous.is_zero() => Err(ReplicationError::InvalidMessage(
            "previous message id is zero".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Message content and chain position before it is signed.
#[derive(Debug, Clone)]
pub struct UnsignedMessage {
    previous: Option<MessageRef>,
    sequence: Sequence,
    timestamp: DateTime<Utc>,
    content: serde_json::Value,
}

impl UnsignedMessage {
    pub fn new(
        previous: Option<MessageRef>,
        sequence: Sequence,
        timestamp: DateTime<Utc>,
        content: serde_json::Value,
    ) -> ReplicationResult<Self> {
        check_chain_fields(previous.as_ref(), sequence)?;
        Ok(Self {
            previous,
            sequence,
            timestamp,
            content,
        })
    }

    /// Next message of a feed whose current head is `head`.
    pub fn after(
        head: Option<&Message>,
        timestamp: DateTime<Utc>,
        content: serde_json::Value,
    ) -> ReplicationResult<Self> {
        match head {
            Some(head) => Self::new(Some(*head.id()), head.sequence().next(), timestamp, content),
            None => Self::new(None, Sequence::first(), timestamp, content),
        }
    }

    pub fn previous(&self) -> Option<&MessageRef> {
        self.previous.as_ref()
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn content(&self) -> &serde_json::Value {
        &self.content
    }
}

/// A message loaded from bytes whose id is already known.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageWithoutId {
    previous: Option<MessageRef>,
    sequence: Sequence,
    author: IdentityRef,
    feed: FeedRef,
    timestamp: DateTime<Utc>,
    content: Content,
    raw: VerifiedRawMessage,
}

impl MessageWithoutId {
    pub fn new(
        previous: Option<MessageRef>,
        sequence: Sequence,
        author: IdentityRef,
        feed: FeedRef,
        timestamp: DateTime<Utc>,
        content: Content,
        raw: VerifiedRawMessage,
    ) -> ReplicationResult<Self> {
        check_chain_fields(previous.as_ref(), sequence)?;
        if feed.identity() != author {
            return Err(ReplicationError::InvalidMessage(format!(
                "feed {} is not owned by author {}",
                feed, author
            )));
        }
        Ok(Self {
            previous,
            sequence,
            author,
            feed,
            timestamp,
            content,
            raw,
        })
    }

    pub fn with_id(self, id: MessageRef) -> ReplicationResult<Message> {
        if id.is_zero() {
            return Err(ReplicationError::InvalidMessage(
                "message id is zero".to_string(),
            ));
        }
        Ok(Message { id, message: self })
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn feed(&self) -> &FeedRef {
        &self.feed
    }
}

/// A verified message of a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    id: MessageRef,
    message: MessageWithoutId,
}

impl Message {
    pub fn id(&self) -> &MessageRef {
        &self.id
    }

    pub fn previous(&self) -> Option<&MessageRef> {
        self.message.previous.as_ref()
    }

    pub fn sequence(&self) -> Sequence {
        self.message.sequence
    }

    pub fn author(&self) -> &IdentityRef {
        &self.message.author
    }

    pub fn feed(&self) -> &FeedRef {
        &self.message.feed
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.message.timestamp
    }

    pub fn content(&self) -> &Content {
        &self.message.content
    }

    pub fn raw(&self) -> &VerifiedRawMessage {
        &self.message.raw
    }

    /// True if `other` is the next message of this message's feed.
    pub fn comes_directly_before(&self, other: &Message) -> bool {
        other.previous() == Some(&self.id) && self.sequence().comes_directly_before(other.sequence())
    }
}
