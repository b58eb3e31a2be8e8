//! Single write path into feed storage
//!
//! Every message that reaches storage, whether published locally or
//! replicated from a peer, goes through [`FeedWriter::append`]. Appended
//! messages are broadcast so live history streams and EBT streamers can
//! push them on without polling storage.

use crate::error::{ReplicationError, ReplicationResult};
use crate::feed::{Message, Sequence};
use crate::identity::FeedRef;
use crate::storage::FeedRepository;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default capacity for the appended-message broadcast channel
const APPENDED_CHANNEL_CAPACITY: usize = 1024;

/// Result of appending a batch to one feed.
#[derive(Debug, Default)]
pub struct Appended {
    /// Messages now stored, in order
    pub persisted: Vec<Message>,
    /// Messages already stored before this batch
    pub duplicates: usize,
    /// Why the rest of the batch was not stored
    pub rejected: Option<ReplicationError>,
}

pub struct FeedWriter {
    repository: Arc<dyn FeedRepository>,
    appended_tx: broadcast::Sender<Message>,
}

impl FeedWriter {
    pub fn new(repository: Arc<dyn FeedRepository>) -> Self {
        let (appended_tx, _) = broadcast::channel(APPENDED_CHANNEL_CAPACITY);
        Self {
            repository,
            appended_tx,
        }
    }

    pub fn repository(&self) -> &Arc<dyn FeedRepository> {
        &self.repository
    }

    /// Subscribe to messages as they are persisted.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.appended_tx.subscribe()
    }

    /// Append messages of one feed, ordered by sequence.
    ///
    /// Messages at or below the stored head are skipped as duplicates. The
    /// batch stops at the first message that does not continue the feed;
    /// everything before it is still persisted.
    pub fn append(&self, feed: &FeedRef, messages: &[Message]) -> ReplicationResult<Appended> {
        let mut duplicates = 0;
        let mut rejected = None;

        let persisted = self.repository.update_feed(feed, &mut |current| {
            duplicates = 0;
            rejected = None;
            for message in messages {
                if current
                    .sequence()
                    .is_some_and(|head: Sequence| message.sequence() <= head)
                {
                    duplicates += 1;
                    continue;
                }
                if let Err(e) = current.append(message.clone()) {
                    rejected = Some(e);
                    break;
                }
            }
            Ok(())
        })?;

        if let Some(e) = &rejected {
            warn!(feed = %feed, persisted = persisted.len(), error = %e, "Rejected part of a batch");
        }
        if duplicates > 0 {
            debug!(feed = %feed, duplicates, "Skipped already stored messages");
        }

        for message in &persisted {
            // no subscribers is fine
            let _ = self.appended_tx.send(message.clone());
        }

        Ok(Appended {
            persisted,
            duplicates,
            rejected,
        })
    }

    /// Append a single message, failing if it does not continue the feed.
    pub fn append_one(&self, message: Message) -> ReplicationResult<Message> {
        let feed = *message.feed();
        let mut appended = self.append(&feed, std::slice::from_ref(&message))?;
        if let Some(e) = appended.rejected {
            return Err(e);
        }
        appended.persisted.pop().ok_or_else(|| {
            ReplicationError::ChainViolation(format!(
                "message {} is already stored in feed {}",
                message.sequence(),
                feed
            ))
        })
    }
}
