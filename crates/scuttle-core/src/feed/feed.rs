//! Feed aggregate guarding the append-only invariant
//!
//! A [`Feed`] is loaded with its current head, receives new messages
//! through [`Feed::append`] and hands the accepted ones to storage via
//! [`Feed::pop_for_persisting`]. Storage does this inside one write
//! transaction per feed, which makes "append next message to F" a
//! critical section scoped to F.

use crate::error::{ReplicationError, ReplicationResult};
use crate::feed::content::{ContactContent, KnownContent};
use crate::feed::message::{Message, Sequence};
use crate::identity::{FeedRef, IdentityRef};

/// Contact change derived from an appended message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactToSave {
    who: IdentityRef,
    content: ContactContent,
}

impl ContactToSave {
    pub fn who(&self) -> &IdentityRef {
        &self.who
    }

    pub fn content(&self) -> &ContactContent {
        &self.content
    }
}

/// Accepted message together with the side effects it carries.
#[derive(Debug, Clone)]
pub struct MessageToPersist {
    message: Message,
    contacts: Vec<ContactToSave>,
}

impl MessageToPersist {
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn contacts(&self) -> &[ContactToSave] {
        &self.contacts
    }
}

/// Append-only view of one feed.
#[derive(Debug)]
pub struct Feed {
    feed: FeedRef,
    head: Option<Message>,
    to_persist: Vec<MessageToPersist>,
}

impl Feed {
    /// A feed with no messages yet.
    pub fn new(feed: FeedRef) -> Self {
        Self {
            feed,
            head: None,
            to_persist: Vec::new(),
        }
    }

    /// A feed whose last persisted message is `head`.
    pub fn with_head(head: Message) -> Self {
        Self {
            feed: *head.feed(),
            head: Some(head),
            to_persist: Vec::new(),
        }
    }

    pub fn feed_ref(&self) -> &FeedRef {
        &self.feed
    }

    /// Last message, including ones appended but not persisted yet.
    pub fn head(&self) -> Option<&Message> {
        self.head.as_ref()
    }

    pub fn sequence(&self) -> Option<Sequence> {
        self.head.as_ref().map(|m| m.sequence())
    }

    /// Append a message that directly continues the feed.
    pub fn append(&mut self, message: Message) -> ReplicationResult<()> {
        if message.feed() != &self.feed {
            return Err(ReplicationError::ChainViolation(format!(
                "message of feed {} appended to feed {}",
                message.feed(),
                self.feed
            )));
        }

        match &self.head {
            None if !message.sequence().is_first() => {
                return Err(ReplicationError::ChainViolation(format!(
                    "feed {} is empty, got sequence {}",
                    self.feed,
                    message.sequence()
                )));
            }
            Some(head) if !head.comes_directly_before(&message) => {
                return Err(ReplicationError::ChainViolation(format!(
                    "feed {} is at sequence {}, got sequence {} with previous {:?}",
                    self.feed,
                    head.sequence(),
                    message.sequence(),
                    message.previous()
                )));
            }
            _ => {}
        }

        let contacts = match message.content().known() {
            Some(KnownContent::Contact(content)) => vec![ContactToSave {
                who: *message.author(),
                content,
            }],
            None => Vec::new(),
        };

        self.head = Some(message.clone());
        self.to_persist.push(MessageToPersist { message, contacts });
        Ok(())
    }

    /// Messages appended since the feed was loaded, in order.
    pub fn pop_for_persisting(&mut self) -> Vec<MessageToPersist> {
        std::mem::take(&mut self.to_persist)
    }
}
